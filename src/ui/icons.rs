//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[--]");

// Node steps
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "[>]");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "[P]");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "[I]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[W]");
pub static HAMMER: Emoji<'_, '_> = Emoji("🔨 ", "[B]");
pub static INBOX: Emoji<'_, '_> = Emoji("📥 ", "[R]");
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[V]");
