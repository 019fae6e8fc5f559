use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use headless_chrome::protocol::cdp::{DOM, Emulation, Page};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};

use super::settings::{ImageFormat, PrintSettings, ScreenshotSettings};
use super::{EngineSession, LaunchSpec, RenderEngine, RenderError};

const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Waits for web fonts and for mermaid to finish replacing its blocks.
const SETTLE_SCRIPT: &str = r#"
new Promise((resolve) => {
  const started = Date.now();
  const poll = () => {
    const pending = document.querySelector('.mermaid:not([data-processed])');
    if (!pending || !window.mermaid || Date.now() - started > 10000) {
      document.fonts.ready.then(() => resolve(true));
    } else {
      setTimeout(poll, 50);
    }
  };
  poll();
})
"#;

const PAGE_SIZE_SCRIPT: &str = "JSON.stringify([document.documentElement.scrollWidth, document.documentElement.scrollHeight])";

/// Headless Chrome or Chromium driven over the DevTools protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeEngine;

impl RenderEngine for ChromeEngine {
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn EngineSession>, RenderError> {
        let lang = OsString::from(format!("--lang={}", spec.lang));
        let setuid = OsString::from("--disable-setuid-sandbox");
        let options = LaunchOptions::default_builder()
            .path(Some(spec.executable.to_path_buf()))
            .headless(true)
            .sandbox(false)
            .idle_browser_timeout(IDLE_TIMEOUT)
            .args(vec![lang.as_os_str(), setuid.as_os_str()])
            .build()
            .map_err(|err| RenderError::Launch(err.to_string()))?;

        let browser = Browser::new(options).map_err(|err| RenderError::Launch(err.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|err| RenderError::Launch(err.to_string()))?;
        tracing::debug!(executable = %spec.executable.display(), "engine launched");

        Ok(Box::new(ChromeSession { browser, tab }))
    }
}

struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    fn page_size(&self) -> Result<(f64, f64), RenderError> {
        let result = self
            .tab
            .evaluate(PAGE_SIZE_SCRIPT, false)
            .map_err(|err| RenderError::Screenshot(err.to_string()))?;
        let encoded = result
            .value
            .as_ref()
            .and_then(|value| value.as_str())
            .ok_or_else(|| RenderError::Screenshot("page size unavailable".to_string()))?;
        let [width, height]: [f64; 2] = serde_json::from_str(encoded)
            .map_err(|err| RenderError::Screenshot(format!("page size unreadable: {err}")))?;
        Ok((width, height))
    }
}

impl EngineSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        let failed = |message: String| RenderError::Navigate {
            url: url.to_string(),
            message,
        };
        self.tab
            .navigate_to(url)
            .map_err(|err| failed(err.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|err| failed(err.to_string()))?;
        if let Err(err) = self.tab.evaluate(SETTLE_SCRIPT, true) {
            tracing::debug!(error = %err, "page did not report settled");
        }
        Ok(())
    }

    fn print_pdf(&mut self, settings: &PrintSettings) -> Result<Vec<u8>, RenderError> {
        let (paper_width, paper_height) = settings.paper.dimensions();
        let options = PrintToPdfOptions {
            landscape: Some(settings.landscape),
            display_header_footer: Some(settings.display_header_footer),
            print_background: Some(settings.print_background),
            scale: Some(settings.scale),
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(settings.margins.top),
            margin_bottom: Some(settings.margins.bottom),
            margin_left: Some(settings.margins.left),
            margin_right: Some(settings.margins.right),
            page_ranges: settings.page_ranges.clone(),
            header_template: settings.header_template.clone(),
            footer_template: settings.footer_template.clone(),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };
        self.tab
            .print_to_pdf(Some(options))
            .map_err(|err| RenderError::Print(err.to_string()))
    }

    fn screenshot(&mut self, settings: &ScreenshotSettings) -> Result<Vec<u8>, RenderError> {
        if settings.omit_background {
            self.tab
                .call_method(Emulation::SetDefaultBackgroundColorOverride {
                    color: Some(DOM::RGBA {
                        r: 0,
                        g: 0,
                        b: 0,
                        a: Some(0.0),
                    }),
                })
                .map_err(|err| RenderError::Screenshot(err.to_string()))?;
        }

        let clip = match settings.clip {
            Some(clip) => Page::Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            },
            None => {
                let (width, height) = self.page_size()?;
                Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                    scale: 1.0,
                }
            }
        };

        let data = self
            .tab
            .call_method(screenshot_request(settings, clip))
            .map_err(|err| RenderError::Screenshot(err.to_string()))?
            .data;
        decode_image(&data)
    }

    fn close(self: Box<Self>) -> Result<(), RenderError> {
        let ChromeSession { browser, tab } = *self;
        let closed = tab
            .close(false)
            .map_err(|err| RenderError::Close(err.to_string()));
        drop(browser);
        closed.map(|_| ())
    }
}

/// Captures beyond the viewport so clips below the fold, including the
/// full-page clip, are rendered.
fn screenshot_request(settings: &ScreenshotSettings, clip: Page::Viewport) -> Page::CaptureScreenshot {
    let format = match settings.format {
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
    };
    Page::CaptureScreenshot {
        format: Some(format),
        quality: settings.quality.map(u32::from),
        clip: Some(clip),
        from_surface: Some(true),
        capture_beyond_viewport: Some(true),
        optimize_for_speed: None,
    }
}

fn decode_image(data: &str) -> Result<Vec<u8>, RenderError> {
    STANDARD
        .decode(data)
        .map_err(|err| RenderError::Screenshot(format!("undecodable image data: {err}")))
}
