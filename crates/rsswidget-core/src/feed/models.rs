use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An article as delivered by the upstream feed document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArticle {
    pub title: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

/// A normalized feed entry, ready for presentation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    /// Entry body as published (usually HTML)
    pub body: String,
    pub date: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

impl From<RawArticle> for Entry {
    fn from(article: RawArticle) -> Self {
        Self {
            title: article.title.unwrap_or_default(),
            body: article.description.unwrap_or_default(),
            date: article.pub_date,
            link: article.link,
        }
    }
}

impl Entry {
    /// Render the body as plain text wrapped at `width` columns
    pub fn body_text(&self, width: usize) -> String {
        if self.body.is_empty() {
            return String::new();
        }
        html2text::from_read(self.body.as_bytes(), width.max(1))
            .unwrap_or_else(|_| self.body.clone())
    }
}
