use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{NewWord, Word};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("no valid rows to import ({skipped} skipped)")]
    NoValidRows { skipped: usize },
    #[error("could not read csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    pub words: Vec<NewWord>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub words: Vec<Word>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    word: usize,
    pinyin: usize,
    definition: usize,
    example: Option<usize>,
    audio: Option<usize>,
}

const POSITIONAL: Columns = Columns {
    word: 0,
    pinyin: 1,
    definition: 2,
    example: Some(3),
    audio: Some(4),
};

fn find_column(header: &[String], names: &[&str]) -> Option<usize> {
    header.iter().position(|field| {
        let field = field.trim();
        names.iter().any(|name| field.eq_ignore_ascii_case(name))
    })
}

fn columns_for(header: &[String]) -> Columns {
    let word = find_column(header, &["word"]);
    let pinyin = find_column(header, &["pinyin"]);
    let definition = find_column(header, &["definition", "meaning"]);
    match (word, pinyin, definition) {
        (Some(word), Some(pinyin), Some(definition)) => Columns {
            word,
            pinyin,
            definition,
            example: find_column(header, &["example", "sentence"]),
            audio: find_column(header, &["audio", "audio_link", "audioref", "audio_ref"]),
        },
        _ => POSITIONAL,
    }
}

fn required(row: &[String], index: usize) -> Option<String> {
    row.get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn optional(row: &[String], index: Option<usize>) -> Option<String> {
    index.and_then(|index| required(row, index))
}

/// Maps raw rows to words. The first row is always the header; when it names
/// the `word`, `pinyin` and `definition` columns they are looked up by name,
/// otherwise the layout `word, pinyin, definition, example, audio` is assumed.
/// Rows missing a required field are skipped.
pub fn map_rows(rows: &[Vec<String>]) -> Result<ImportBatch, ImportError> {
    let Some((header, records)) = rows.split_first() else {
        return Err(ImportError::NoValidRows { skipped: 0 });
    };
    let columns = columns_for(header);

    let mut words = Vec::new();
    let mut skipped = 0;
    for (line, row) in records.iter().enumerate() {
        let fields = (
            required(row, columns.word),
            required(row, columns.pinyin),
            required(row, columns.definition),
        );
        let (Some(word), Some(pinyin), Some(definition)) = fields else {
            warn!(row = line + 2, fields = row.len(), "skipping malformed import row");
            skipped += 1;
            continue;
        };
        words.push(NewWord {
            word,
            pinyin,
            definition,
            example: optional(row, columns.example),
            audio_ref: optional(row, columns.audio),
        });
    }

    if words.is_empty() {
        return Err(ImportError::NoValidRows { skipped });
    }
    Ok(ImportBatch { words, skipped })
}

/// Reads every CSV record, header included, as raw rows for [`map_rows`].
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Vec<String>>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|line| line.iter().map(|field| field.to_string()).collect())
            .collect()
    }

    #[test]
    fn header_columns_are_matched_by_name() {
        let batch = map_rows(&rows(&[
            &["Definition", "Word", "Pinyin", "Audio_Link"],
            &["to eat", "吃", "chī", "chi.mp3"],
        ]))
        .unwrap();
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.words[0].word, "吃");
        assert_eq!(batch.words[0].definition, "to eat");
        assert_eq!(batch.words[0].audio_ref.as_deref(), Some("chi.mp3"));
        assert_eq!(batch.words[0].example, None);
    }

    #[test]
    fn short_rows_are_skipped_and_counted() {
        let batch = map_rows(&rows(&[
            &["word", "pinyin", "definition", "example"],
            &["喝", "hē"],
            &["茶", "chá", "tea", "我喝茶"],
            &["", "kōng", "empty"],
            &["水", "shuǐ", "water"],
        ]))
        .unwrap();
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.words.len(), 2);
        assert_eq!(batch.words[0].example.as_deref(), Some("我喝茶"));
        assert_eq!(batch.words[1].example, None);
    }

    #[test]
    fn unrecognised_header_uses_positional_layout() {
        let batch = map_rows(&rows(&[&["a", "b", "c"], &["大", "dà", "big", "", "da.mp3"]])).unwrap();
        assert_eq!(batch.words[0].pinyin, "dà");
        assert_eq!(batch.words[0].example, None);
        assert_eq!(batch.words[0].audio_ref.as_deref(), Some("da.mp3"));
    }

    #[test]
    fn all_rows_invalid_fails_the_import() {
        let err = map_rows(&rows(&[&["word", "pinyin", "definition"], &["只有"]])).unwrap_err();
        assert!(matches!(err, ImportError::NoValidRows { skipped: 1 }));
        assert!(matches!(map_rows(&[]), Err(ImportError::NoValidRows { skipped: 0 })));
    }

    #[test]
    fn csv_reader_keeps_ragged_records() {
        let data = "word,pinyin,definition,example\n好,hǎo,good\n\"人, 们\",rén men,people,他们是人\n";
        let rows = read_csv(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].len(), 3);
        assert_eq!(rows[2][0], "人, 们");
        let batch = map_rows(&rows).unwrap();
        assert_eq!(batch.words.len(), 2);
    }
}
