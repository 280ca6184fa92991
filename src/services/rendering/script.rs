// Script classification for shaping decisions

use cosmic_text::Shaping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    /// Independent glyphs laid out left to right
    Simple,
    /// Contains right-to-left runs (Arabic, Hebrew, ...)
    RightToLeft,
    /// Left to right, but glyphs join or reorder (Devanagari and other Indic)
    Connected,
}

impl ScriptClass {
    /// Complex scripts need full shaping: contextual joining forms plus
    /// bidirectional reordering from storage to display order.
    pub fn shaping(&self) -> Shaping {
        match self {
            ScriptClass::Simple => Shaping::Basic,
            ScriptClass::RightToLeft | ScriptClass::Connected => Shaping::Advanced,
        }
    }

    pub fn needs_shaping(&self) -> bool {
        !matches!(self, ScriptClass::Simple)
    }
}

fn is_rtl(c: char) -> bool {
    matches!(c,
        '\u{0590}'..='\u{05FF}' |  // Hebrew
        '\u{0600}'..='\u{06FF}' |  // Arabic
        '\u{0700}'..='\u{074F}' |  // Syriac
        '\u{0750}'..='\u{077F}' |  // Arabic Supplement
        '\u{0780}'..='\u{07BF}' |  // Thaana
        '\u{07C0}'..='\u{07FF}' |  // NKo
        '\u{08A0}'..='\u{08FF}' |  // Arabic Extended-A
        '\u{FB1D}'..='\u{FDFF}' |  // Hebrew/Arabic presentation forms A
        '\u{FE70}'..='\u{FEFF}'    // Arabic presentation forms B
    )
}

fn is_connected(c: char) -> bool {
    matches!(c,
        '\u{0900}'..='\u{0DFF}' |  // Devanagari through Sinhala
        '\u{0E00}'..='\u{0EFF}' |  // Thai, Lao
        '\u{1000}'..='\u{109F}' |  // Myanmar
        '\u{1780}'..='\u{17FF}' |  // Khmer
        '\u{A8E0}'..='\u{A8FF}'    // Devanagari Extended
    )
}

/// Any right-to-left character makes the text RightToLeft, else any connected
/// character makes it Connected.
pub fn classify(text: &str) -> ScriptClass {
    let mut class = ScriptClass::Simple;
    for c in text.chars() {
        if is_rtl(c) {
            return ScriptClass::RightToLeft;
        }
        if is_connected(c) {
            class = ScriptClass::Connected;
        }
    }
    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("HELLO"), ScriptClass::Simple);
        assert_eq!(classify("Hola, ¿qué tal?"), ScriptClass::Simple);
        assert_eq!(classify("こんにちは"), ScriptClass::Simple);
        assert_eq!(classify("मुझे हिंदी पसंद है"), ScriptClass::Connected);
        assert_eq!(classify("مرحبا بالعالم"), ScriptClass::RightToLeft);
        assert_eq!(classify("שלום"), ScriptClass::RightToLeft);
        // Mixed: any RTL run makes the whole line bidirectional
        assert_eq!(classify("version 2 مرحبا"), ScriptClass::RightToLeft);
    }

    #[test]
    fn test_shaping_choice() {
        assert!(matches!(ScriptClass::Simple.shaping(), Shaping::Basic));
        assert!(matches!(ScriptClass::RightToLeft.shaping(), Shaping::Advanced));
        assert!(matches!(ScriptClass::Connected.shaping(), Shaping::Advanced));
    }
}
