use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<comfy_table::Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// `0x`-less, zero-padded upper-case hex, as UMP words are usually written.
pub fn hex_word(word: u32) -> String {
    format!("{word:08X}")
}

pub fn hex_words(words: &[u32]) -> String {
    words.iter().map(|w| hex_word(*w)).collect::<Vec<_>>().join(" ")
}

pub fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_words_are_padded() {
        assert_eq!(hex_word(0x10), "00000010");
        assert_eq!(hex_words(&[0x4090_3C40, 0x7F00_0000]), "40903C40 7F000000");
    }

    #[test]
    fn optional_placeholder() {
        assert_eq!(optional(Some(3u8)), "3");
        assert_eq!(optional::<u8>(None), "-");
    }
}
