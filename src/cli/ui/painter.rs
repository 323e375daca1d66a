use owo_colors::{OwoColorize, Style as OwoStyle};

/// RSSI at or above which a link is considered strong.
const STRONG_RSSI: i16 = -60;
/// RSSI below which a link is considered weak.
const WEAK_RSSI: i16 = -80;

/// Applies colour and style to terminal text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Colours a signal strength by how usable the link is likely to be.
    pub(crate) fn rssi(&self, rssi: i16, text: &str) -> String {
        let style = if rssi >= STRONG_RSSI {
            OwoStyle::new().green()
        } else if rssi < WEAK_RSSI {
            OwoStyle::new().red()
        } else {
            OwoStyle::new().yellow()
        };
        self.paint(text, style)
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(-40)]
    #[case(-70)]
    #[case(-95)]
    fn plain_painter_leaves_rssi_untouched(#[case] rssi: i16) {
        let painter = Painter::new(false);
        assert_eq!("-70 dBm", painter.rssi(rssi, "-70 dBm"));
    }

    #[rstest]
    #[case(-40)]
    #[case(-70)]
    #[case(-95)]
    fn coloured_painter_styles_rssi(#[case] rssi: i16) {
        let painter = Painter::new(true);
        let styled = painter.rssi(rssi, "x");
        assert_ne!("x", styled);
        assert!(styled.contains('x'));
    }

    #[test]
    fn strength_bands_use_distinct_styles() {
        let painter = Painter::new(true);
        let strong = painter.rssi(-40, "x");
        let fair = painter.rssi(-70, "x");
        let weak = painter.rssi(-90, "x");
        assert_ne!(strong, fair);
        assert_ne!(fair, weak);
    }
}
