//! Browser-context contract
//!
//! A browser context is the execution's handle on the tabs it automates. It
//! is opaque to the runtime apart from page snapshots and tab locking.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Browser tab id
pub type TabId = i64;

/// Lightweight snapshot of a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
    /// Rendered summary of interactive elements and text
    pub summary: String,
    /// Optional base64 screenshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl PageState {
    /// Text form stored as the browser-state turn
    pub fn render(&self) -> String {
        let mut out = format!(
            "Tab {}: {} ({})\n{}",
            self.tab_id, self.title, self.url, self.summary
        );
        if self.screenshot.is_some() {
            out.push_str("\n[screenshot attached]");
        }
        out
    }
}

/// Render several page snapshots as one browser-state block
pub fn render_pages(pages: &[PageState]) -> String {
    pages
        .iter()
        .map(PageState::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Handle on the tabs an execution drives
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Snapshot of the page the execution is currently on
    async fn current_page(&self) -> Result<PageState>;

    /// Snapshots of specific tabs
    ///
    /// The default only knows the current page and returns it when its tab
    /// is requested.
    async fn pages(&self, tab_ids: &[TabId]) -> Result<Vec<PageState>> {
        let page = self.current_page().await?;
        if tab_ids.is_empty() || tab_ids.contains(&page.tab_id) {
            Ok(vec![page])
        } else {
            Ok(Vec::new())
        }
    }

    /// Restrict automation to one tab for the duration of a run
    async fn lock_to_tab(&self, tab_id: TabId) -> Result<()>;

    /// Release the tab lock; must be safe to call when not locked
    async fn unlock(&self);

    /// Release everything held by this context
    async fn cleanup(&self);
}

/// Creates one browser context per execution
#[async_trait]
pub trait BrowserContextFactory: Send + Sync {
    async fn create(&self, execution_id: &str) -> Result<Arc<dyn BrowserContext>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let page = PageState {
            tab_id: 7,
            url: "https://example.com".into(),
            title: "Example".into(),
            summary: "[1] <a>More information</a>".into(),
            screenshot: None,
        };
        assert_eq!(
            page.render(),
            "Tab 7: Example (https://example.com)\n[1] <a>More information</a>"
        );

        let with_shot = PageState {
            screenshot: Some("iVBOR".into()),
            ..page.clone()
        };
        assert!(with_shot.render().ends_with("[screenshot attached]"));
        assert_eq!(render_pages(&[page.clone(), page]).matches("Tab 7").count(), 2);
    }
}
