pub mod fetch;
pub mod resolve;
pub mod serve;
pub mod status;

use rsswidget_core::feed::Entry;

/// Print entries the way every command shows them
pub(crate) fn print_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) {
    for (idx, entry) in entries.into_iter().enumerate() {
        let date = entry
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>3}. {} ({})", idx + 1, entry.title, date);
        if let Some(ref link) = entry.link {
            println!("     {}", link);
        }
        let text = entry.body_text(76);
        for line in text.lines().take(3) {
            println!("     {}", line);
        }
    }
}
