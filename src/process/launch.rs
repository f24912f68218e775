//! Browser-subprocess argv construction (spec §6), generalized from the
//! teacher's `browser_setup.rs` stealth-flag builder into the literal
//! default flag set spec.md names.

use std::path::PathBuf;
use std::process::Command;

use tracing::{info, warn};

/// Default flags, in the order spec §6 lists them. `--remote-debugging-port`
/// and the trailing `about:blank` are appended by [`default_args`].
const DEFAULT_FLAGS: &[&str] = &[
    "--headless",
    "--mute-audio",
    "--disable-gpu",
    "--hide-scrollbars",
    "--no-default-browser-check",
    "--no-first-run",
    "--metrics-recording-only",
    "--password-store=basic",
    "--use-mock-keychain",
    "--disable-features=Translate,OptimizationHints,MediaRouter,InterestFeedContentSuggestions",
    "--disable-extensions",
    "--disable-component-extensions-with-background-pages",
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-client-side-phishing-detection",
    "--disable-sync",
    "--disable-default-apps",
    "--disable-domain-reliability",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-background-timer-throttling",
    "--disable-ipc-flooding-protection",
];

/// Composes the final argv: `default_flags ∪ overrides ∪ user_extras ∪
/// about:blank`. `overrides`, when set, replaces the default flag set
/// wholesale; `extras` always append.
pub fn build_args(port: u16, overrides: Option<&[String]>, extras: &[String]) -> Vec<String> {
    let mut args: Vec<String> = match overrides {
        Some(custom) => custom.to_vec(),
        None => DEFAULT_FLAGS.iter().map(|s| s.to_string()).collect(),
    };
    args.extend(extras.iter().cloned());
    args.push(format!("--remote-debugging-port={port}"));
    args.push("about:blank".to_string());
    args
}

/// Locates a Chrome/Chromium executable when the config omits one:
/// `CHROMIUM_PATH` env var, then well-known per-platform install paths,
/// then `which` on Unix.
pub fn find_browser_executable() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(path = %path.display(), "using browser from CHROMIUM_PATH");
            return Ok(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a nonexistent file");
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        if let Some(home) = dirs::home_dir() {
            let candidate = home.join("Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
            if candidate.exists() {
                info!(path = %candidate.display(), "found browser executable");
                return Ok(candidate);
            }
        }
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(path = %path.display(), "found browser executable");
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    info!(path = %path_str, "found browser executable via which");
                    return Ok(PathBuf::from(path_str));
                }
            }
        }
    }

    Err(anyhow::anyhow!("no Chrome/Chromium executable found; set CHROMIUM_PATH"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_include_port_and_blank_page() {
        let args = build_args(9222, None, &[]);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert_eq!(args.last().unwrap(), "about:blank");
        assert!(args.contains(&"--headless".to_string()));
    }

    #[test]
    fn overrides_replace_defaults_wholesale() {
        let overrides = vec!["--custom-flag".to_string()];
        let args = build_args(9222, Some(&overrides), &[]);
        assert!(!args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--custom-flag".to_string()));
    }

    #[test]
    fn extras_append_regardless_of_overrides() {
        let extras = vec!["--extra-flag".to_string()];
        let args = build_args(9222, None, &extras);
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--extra-flag".to_string()));
    }
}
