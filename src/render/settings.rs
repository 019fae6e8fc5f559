//! Typed print and screenshot parameters built from the effective options.

use crate::config::{Clip, EffectiveOptions, Format, ImageOptions, PageSize, PdfOptions};

use super::RenderError;

const PX_PER_INCH: f64 = 96.0;
const CM_PER_INCH: f64 = 2.54;
const MM_PER_INCH: f64 = 25.4;

/// Named paper sizes in inches, portrait.
const PAPER_FORMATS: &[(&str, f64, f64)] = &[
    ("Letter", 8.5, 11.0),
    ("Legal", 8.5, 14.0),
    ("Tabloid", 11.0, 17.0),
    ("Ledger", 17.0, 11.0),
    ("A0", 33.1, 46.8),
    ("A1", 23.4, 33.1),
    ("A2", 16.54, 23.4),
    ("A3", 11.7, 16.54),
    ("A4", 8.27, 11.7),
    ("A5", 5.83, 8.27),
    ("A6", 4.13, 5.83),
];

/// Parse a CSS-like length into inches. Bare numbers are pixels.
pub fn parse_length(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, divisor) = if let Some(number) = value.strip_suffix("px") {
        (number, PX_PER_INCH)
    } else if let Some(number) = value.strip_suffix("in") {
        (number, 1.0)
    } else if let Some(number) = value.strip_suffix("cm") {
        (number, CM_PER_INCH)
    } else if let Some(number) = value.strip_suffix("mm") {
        (number, MM_PER_INCH)
    } else {
        (value, PX_PER_INCH)
    };
    let number: f64 = number.trim().parse().ok()?;
    (number.is_finite() && number >= 0.0).then_some(number / divisor)
}

fn length(key: &'static str, value: &str) -> Result<f64, RenderError> {
    if value.trim().is_empty() {
        return Ok(0.0);
    }
    parse_length(value).ok_or_else(|| RenderError::Length {
        key,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Paper {
    Format { name: String, width: f64, height: f64 },
    Custom { width: f64, height: f64 },
}

impl Paper {
    pub fn named(name: &str) -> Result<Self, RenderError> {
        PAPER_FORMATS
            .iter()
            .find(|(known, _, _)| known.eq_ignore_ascii_case(name.trim()))
            .map(|(known, width, height)| Paper::Format {
                name: (*known).to_string(),
                width: *width,
                height: *height,
            })
            .ok_or_else(|| RenderError::PaperFormat(name.to_string()))
    }

    /// Width and height in inches.
    pub fn dimensions(&self) -> (f64, f64) {
        match self {
            Self::Format { width, height, .. } | Self::Custom { width, height } => {
                (*width, *height)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginsInches {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintSettings {
    pub paper: Paper,
    pub landscape: bool,
    pub scale: f64,
    pub margins: MarginsInches,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub print_background: bool,
    pub page_ranges: Option<String>,
}

impl PrintSettings {
    pub fn from_options(pdf: &PdfOptions) -> Result<Self, RenderError> {
        let paper = match pdf.page_size() {
            PageSize::Named(name) => Paper::named(&name)?,
            PageSize::Custom { width, height } => Paper::Custom {
                width: length("width", &width)?,
                height: length("height", &height)?,
            },
        };
        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());

        Ok(Self {
            paper,
            landscape: pdf.landscape(),
            scale: pdf.scale,
            margins: MarginsInches {
                top: length("margin.top", &pdf.margin.top)?,
                right: length("margin.right", &pdf.margin.right)?,
                bottom: length("margin.bottom", &pdf.margin.bottom)?,
                left: length("margin.left", &pdf.margin.left)?,
            },
            display_header_footer: pdf.display_header_footer,
            header_template: non_empty(&pdf.header_template),
            footer_template: non_empty(&pdf.footer_template),
            print_background: pdf.print_background,
            page_ranges: non_empty(pdf.page_ranges.trim()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotSettings {
    pub format: ImageFormat,
    /// Only set for JPEG.
    pub quality: Option<u8>,
    /// `None` captures the full page.
    pub clip: Option<Clip>,
    pub omit_background: bool,
}

impl ScreenshotSettings {
    pub fn from_options(format: ImageFormat, image: &ImageOptions) -> Self {
        let quality = match format {
            ImageFormat::Jpeg => image.quality_for(Format::Jpeg),
            ImageFormat::Png => None,
        };
        Self {
            format,
            quality,
            clip: image.clip(),
            omit_background: image.omit_background,
        }
    }

    pub fn full_page(&self) -> bool {
        self.clip.is_none()
    }
}

/// What the engine produces for one output format.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Pdf(PrintSettings),
    Image(ScreenshotSettings),
}

impl Capture {
    /// `None` for formats written without the engine.
    pub fn for_format(format: Format, options: &EffectiveOptions) -> Result<Option<Self>, RenderError> {
        let capture = match format {
            Format::Html => return Ok(None),
            Format::Pdf => Capture::Pdf(PrintSettings::from_options(&options.pdf)?),
            Format::Png => Capture::Image(ScreenshotSettings::from_options(
                ImageFormat::Png,
                &options.image,
            )),
            Format::Jpeg => Capture::Image(ScreenshotSettings::from_options(
                ImageFormat::Jpeg,
                &options.image,
            )),
        };
        Ok(Some(capture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Margins;

    fn pdf_options() -> PdfOptions {
        PdfOptions {
            scale: 1.0,
            display_header_footer: true,
            header_template: "<div></div>".to_string(),
            footer_template: String::new(),
            print_background: true,
            orientation: "portrait".to_string(),
            page_ranges: String::new(),
            format: "A4".to_string(),
            width: String::new(),
            height: String::new(),
            margin: Margins {
                top: "1.5cm".to_string(),
                right: "1cm".to_string(),
                bottom: "10mm".to_string(),
                left: "96px".to_string(),
            },
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn lengths() {
        assert!(close(parse_length("96px").unwrap(), 1.0));
        assert!(close(parse_length("2in").unwrap(), 2.0));
        assert!(close(parse_length("2.54cm").unwrap(), 1.0));
        assert!(close(parse_length("25.4mm").unwrap(), 1.0));
        assert!(close(parse_length("192").unwrap(), 2.0));
        assert!(parse_length("wide").is_none());
        assert!(parse_length("-1in").is_none());
    }

    #[test]
    fn named_format_is_case_insensitive() {
        assert_eq!(
            Paper::named("letter").unwrap(),
            Paper::Format {
                name: "Letter".to_string(),
                width: 8.5,
                height: 11.0
            }
        );
        assert!(matches!(Paper::named("B5"), Err(RenderError::PaperFormat(_))));
    }

    #[test]
    fn default_print_settings() {
        let settings = PrintSettings::from_options(&pdf_options()).unwrap();
        assert_eq!(settings.paper.dimensions(), (8.27, 11.7));
        assert!(!settings.landscape);
        assert!(close(settings.margins.top, 1.5 / 2.54));
        assert!(close(settings.margins.bottom, 10.0 / 25.4));
        assert!(close(settings.margins.left, 1.0));
        assert_eq!(settings.header_template.as_deref(), Some("<div></div>"));
        assert_eq!(settings.footer_template, None);
        assert_eq!(settings.page_ranges, None);
    }

    #[test]
    fn explicit_dimensions_override_format() {
        let mut options = pdf_options();
        options.width = "10in".to_string();
        options.height = "20cm".to_string();
        options.format = "Letter".to_string();
        let settings = PrintSettings::from_options(&options).unwrap();
        assert!(matches!(settings.paper, Paper::Custom { .. }));
        let (width, height) = settings.paper.dimensions();
        assert!(close(width, 10.0));
        assert!(close(height, 20.0 / 2.54));
    }

    #[test]
    fn landscape_and_ranges() {
        let mut options = pdf_options();
        options.orientation = "landscape".to_string();
        options.page_ranges = "1-3, 5".to_string();
        let settings = PrintSettings::from_options(&options).unwrap();
        assert!(settings.landscape);
        assert_eq!(settings.page_ranges.as_deref(), Some("1-3, 5"));
    }

    #[test]
    fn invalid_margin_is_an_error() {
        let mut options = pdf_options();
        options.margin.top = "a lot".to_string();
        assert!(matches!(
            PrintSettings::from_options(&options),
            Err(RenderError::Length { key: "margin.top", .. })
        ));
    }

    #[test]
    fn screenshot_quality_and_clip() {
        let image = ImageOptions {
            quality: 75,
            clip_x: Some(0.0),
            clip_y: Some(0.0),
            clip_width: Some(100.0),
            clip_height: None,
            omit_background: true,
        };
        let png = ScreenshotSettings::from_options(ImageFormat::Png, &image);
        assert_eq!(png.quality, None);
        assert!(png.full_page());
        assert!(png.omit_background);

        let jpeg = ScreenshotSettings::from_options(ImageFormat::Jpeg, &image);
        assert_eq!(jpeg.quality, Some(75));
    }
}
