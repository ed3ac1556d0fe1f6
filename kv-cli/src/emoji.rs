//! Emoji used in CLI messages, with plain-text fallbacks for terminals that
//! can't render them (`console::Emoji` picks the fallback automatically).

use console::Emoji;

pub static TARGET: Emoji<'_, '_> = Emoji("🎯  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨  ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📂  ", "");
pub static MEMO: Emoji<'_, '_> = Emoji("📝  ", "");
pub static WAVE: Emoji<'_, '_> = Emoji("👋  ", "");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static DOWN_ARROW: Emoji<'_, '_> = Emoji("⬇️  ", "");
