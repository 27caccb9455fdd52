use once_cell::sync::Lazy;
use regex::Regex;

pub const OVERLAY_ID: &str = "relay-readiness-overlay";

static BODY_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</body\s*>").unwrap());

/// Tuning for the client-side readiness heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval_ms: u64,
    /// The overlay is removed after this long no matter what.
    pub hard_ceiling_ms: u64,
    pub min_elapsed_ms: u64,
    pub min_document_height: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            hard_ceiling_ms: 15_000,
            min_elapsed_ms: 1_200,
            min_document_height: 400,
        }
    }
}

const STYLE: &str = r#"<style id="relay-readiness-style">
#relay-readiness-overlay { position: fixed; inset: 0; z-index: 2147483647; display: flex; flex-direction: column; align-items: center; justify-content: center; background: rgba(255,255,255,.96); font-family: system-ui, sans-serif; color: #333; transition: opacity .3s ease; }
#relay-readiness-overlay.relay-hidden { opacity: 0; pointer-events: none; }
#relay-readiness-overlay .relay-spinner { width: 40px; height: 40px; border: 4px solid #ddd; border-top-color: #3b82f6; border-radius: 50%; animation: relay-spin 1s linear infinite; }
#relay-readiness-overlay .relay-progress { width: 220px; height: 4px; margin-top: 16px; background: #eee; border-radius: 2px; overflow: hidden; }
#relay-readiness-overlay .relay-progress-bar { width: 0; height: 100%; background: #3b82f6; transition: width .4s ease; }
@keyframes relay-spin { to { transform: rotate(360deg); } }
</style>"#;

// Placeholders are substituted in `instrumentation_block`. The ceiling timer
// is armed before anything else can throw.
const SCRIPT: &str = r#"<script id="relay-readiness-script">
(function () {
  var POLL_MS = __POLL_MS__, CEILING_MS = __CEILING_MS__, MIN_ELAPSED_MS = __MIN_ELAPSED_MS__, MIN_HEIGHT = __MIN_HEIGHT__;
  var started = Date.now(), done = false, poller = null;
  var ceiling = setTimeout(function () { hide('ceiling'); }, CEILING_MS);

  function overlay() { return document.getElementById('relay-readiness-overlay'); }

  function hide(reason) {
    if (done) { return; }
    done = true;
    clearTimeout(ceiling);
    if (poller) { clearInterval(poller); }
    var el = overlay();
    if (!el) { return; }
    el.setAttribute('data-hidden-by', reason);
    el.className += ' relay-hidden';
    setTimeout(function () { if (el.parentNode) { el.parentNode.removeChild(el); } }, 350);
  }

  function progress(score) {
    var el = overlay();
    var bar = el && el.querySelector('.relay-progress-bar');
    if (bar) { bar.style.width = Math.min(100, Math.round(score * 100)) + '%'; }
  }

  function signals() {
    var body = document.body, root = document.documentElement;
    var height = Math.max(body ? body.scrollHeight : 0, root ? root.scrollHeight : 0);
    var tall = height >= MIN_HEIGHT;
    var media = !!document.querySelector('img, video, picture, svg, canvas, iframe');
    var structure = !!document.querySelector('main, article, section, header, nav, footer, h1, h2, p');
    var waited = Date.now() - started >= MIN_ELAPSED_MS;
    return { tall: tall, content: media || structure, waited: waited };
  }

  function poll() {
    try {
      var s = signals();
      var score = ((s.tall ? 1 : 0) + (s.content ? 1 : 0) + (s.waited ? 1 : 0)) / 3;
      var elapsed = (Date.now() - started) / CEILING_MS;
      progress(Math.max(score, elapsed));
      if (s.waited && (s.tall || s.content)) { hide('ready'); }
    } catch (e) {
      hide('error');
    }
  }

  window.addEventListener('load', function () { hide('load'); });
  window.addEventListener('error', function () { hide('error'); });
  poller = setInterval(poll, POLL_MS);
  poll();
})();
</script>"#;

/// The complete overlay, style and script block for `config`.
pub fn instrumentation_block(config: &ReadinessConfig) -> String {
    let script = SCRIPT
        .replace("__POLL_MS__", &config.poll_interval_ms.to_string())
        .replace("__CEILING_MS__", &config.hard_ceiling_ms.to_string())
        .replace("__MIN_ELAPSED_MS__", &config.min_elapsed_ms.to_string())
        .replace("__MIN_HEIGHT__", &config.min_document_height.to_string());

    format!(
        "{}<div id=\"{}\" role=\"progressbar\" aria-busy=\"true\" aria-label=\"Loading page\"><div class=\"relay-spinner\"></div><div class=\"relay-progress\"><div class=\"relay-progress-bar\"></div></div></div>{}",
        STYLE, OVERLAY_ID, script
    )
}

/// Places the instrumentation block before the last `</body>`, or at the
/// end of the document when there is none. Already-instrumented documents
/// are returned unchanged.
pub fn inject(html: &str, config: &ReadinessConfig) -> String {
    if html.contains(&format!("id=\"{}\"", OVERLAY_ID)) {
        return html.to_string();
    }

    let block = instrumentation_block(config);
    match BODY_CLOSE.find_iter(html).last() {
        Some(close) => {
            let mut out = String::with_capacity(html.len() + block.len());
            out.push_str(&html[..close.start()]);
            out.push_str(&block);
            out.push_str(&html[close.start()..]);
            out
        }
        None => format!("{}{}", html, block),
    }
}
