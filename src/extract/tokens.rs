//! Token assembly for index documents.

/// Tokens for a filename: its alphanumeric runs, lowercased, joined by
/// spaces. `Q3-Report_final.PDF` becomes `q3 report final pdf`.
pub fn filename_tokens(filename: &str) -> String {
    filename
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Space-join the present, non-blank pieces.
pub fn join_content<'a>(pieces: impl IntoIterator<Item = Option<&'a str>>) -> String {
    pieces
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
