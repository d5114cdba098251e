//! Status icons with plain-text fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
pub static MIC: Emoji<'_, '_> = Emoji("🎤 ", "");
pub static SHARK: Emoji<'_, '_> = Emoji("🦈 ", "");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP] ");
