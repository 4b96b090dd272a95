//! Tokenizer for the file-replacement marker grammar.
//!
//! ```text
//! <<<FILE: path/to/file.ext>>>
//! <<<REPLACEMENT_START>>>
//! complete new file content
//! <<<REPLACEMENT_END>>>
//! ```
//!
//! The scanner is a three-state machine:
//!
//! | state        | event                     | next state / output              |
//! |--------------|---------------------------|----------------------------------|
//! | `SeekFile`   | no `<<<FILE:`             | done                             |
//! | `SeekFile`   | tag without `>>>`         | abort (`UnterminatedFileTag`)    |
//! | `SeekFile`   | empty/multi-line/long path| skip block, stay in `SeekFile`   |
//! | `SeekFile`   | valid path                | `SeekStart`                      |
//! | `SeekStart`  | no start marker           | abort (`MissingStartMarker`)     |
//! | `SeekStart`  | start marker              | `InContent`                      |
//! | `InContent`  | no end marker             | abort (`MissingEndMarker`)       |
//! | `InContent`  | end marker                | emit record, `SeekFile`          |
//!
//! A bad path only loses its own block. A missing start or end marker stops
//! the scan, keeping earlier records: once framing is lost, later blocks
//! cannot be located reliably.

use thiserror::Error;

use crate::core::types::ChangeRecord;

pub const FILE_MARKER: &str = "<<<FILE:";
pub const TAG_CLOSE: &str = ">>>";
pub const START_MARKER: &str = "<<<REPLACEMENT_START>>>";
pub const END_MARKER: &str = "<<<REPLACEMENT_END>>>";

/// Records beyond this count are ignored.
pub const MAX_RECORDS: usize = 256;
/// Paths longer than this (bytes) skip their block.
pub const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("no replacement blocks found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyPath,
    /// The tag ran past a line break before `>>>`.
    MultiLinePath,
    PathTooLong { len: usize },
}

/// A `<<<FILE:` block dropped without aborting the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    /// Byte offset of the `<<<FILE:` marker.
    pub offset: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    UnterminatedFileTag,
    MissingStartMarker,
    MissingEndMarker,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UnterminatedFileTag => "file tag missing closing '>>>'",
            AbortReason::MissingStartMarker => "missing <<<REPLACEMENT_START>>>",
            AbortReason::MissingEndMarker => "missing <<<REPLACEMENT_END>>>",
        }
    }
}

/// One typed result per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Record(ChangeRecord),
    Skipped(SkippedBlock),
    /// Terminal: nothing follows.
    Aborted { offset: usize, reason: AbortReason },
}

#[derive(Debug)]
enum State {
    SeekFile,
    SeekStart { path: String },
    InContent { path: String },
}

/// Iterator over the blocks of a generated response, left to right.
#[derive(Debug)]
pub struct Scanner<'a> {
    text: &'a str,
    pos: usize,
    state: State,
    records: usize,
    done: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            state: State::SeekFile,
            records: 0,
            done: false,
        }
    }

    fn find_from(&self, pattern: &str) -> Option<usize> {
        self.text[self.pos..]
            .find(pattern)
            .map(|idx| idx + self.pos)
    }

    fn abort(&mut self, offset: usize, reason: AbortReason) -> Block {
        self.done = true;
        Block::Aborted { offset, reason }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        loop {
            if self.done {
                return None;
            }
            match std::mem::replace(&mut self.state, State::SeekFile) {
                State::SeekFile => {
                    if self.records >= MAX_RECORDS {
                        self.done = true;
                        return None;
                    }
                    let Some(marker) = self.find_from(FILE_MARKER) else {
                        self.done = true;
                        return None;
                    };
                    self.pos = marker + FILE_MARKER.len();
                    let Some(close) = self.find_from(TAG_CLOSE) else {
                        return Some(self.abort(marker, AbortReason::UnterminatedFileTag));
                    };
                    let path = self.text[self.pos..close]
                        .trim_start_matches(' ')
                        .trim_end();
                    self.pos = close + TAG_CLOSE.len();

                    if path.len() > MAX_PATH_LEN {
                        return Some(Block::Skipped(SkippedBlock {
                            offset: marker,
                            reason: SkipReason::PathTooLong { len: path.len() },
                        }));
                    }
                    if path.is_empty() {
                        return Some(Block::Skipped(SkippedBlock {
                            offset: marker,
                            reason: SkipReason::EmptyPath,
                        }));
                    }
                    if path.contains('\n') {
                        return Some(Block::Skipped(SkippedBlock {
                            offset: marker,
                            reason: SkipReason::MultiLinePath,
                        }));
                    }
                    self.state = State::SeekStart {
                        path: path.to_string(),
                    };
                }
                State::SeekStart { path } => {
                    let Some(start) = self.find_from(START_MARKER) else {
                        let offset = self.pos;
                        return Some(self.abort(offset, AbortReason::MissingStartMarker));
                    };
                    self.pos = start + START_MARKER.len();
                    if self.text[self.pos..].starts_with('\n') {
                        self.pos += 1;
                    }
                    self.state = State::InContent { path };
                }
                State::InContent { path } => {
                    let Some(end) = self.find_from(END_MARKER) else {
                        let offset = self.pos;
                        return Some(self.abort(offset, AbortReason::MissingEndMarker));
                    };
                    let content = &self.text[self.pos..end];
                    self.pos = end + END_MARKER.len();
                    self.records += 1;
                    return Some(Block::Record(ChangeRecord::new(path, content)));
                }
            }
        }
    }
}

/// Everything a scan produced, including the blocks it had to drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchScan {
    pub records: Vec<ChangeRecord>,
    pub skipped: Vec<SkippedBlock>,
    pub aborted: Option<(usize, AbortReason)>,
}

impl PatchScan {
    /// Records in source order, or `NotFound` when none were extracted.
    pub fn into_records(self) -> Result<Vec<ChangeRecord>, PatchError> {
        if self.records.is_empty() {
            return Err(PatchError::NotFound);
        }
        Ok(self.records)
    }
}

/// Run the scanner to completion.
pub fn scan(text: &str) -> PatchScan {
    let mut out = PatchScan::default();
    for block in Scanner::new(text) {
        match block {
            Block::Record(record) => out.records.push(record),
            Block::Skipped(skipped) => out.skipped.push(skipped),
            Block::Aborted { offset, reason } => out.aborted = Some((offset, reason)),
        }
    }
    out
}

/// Extract change records from raw generated text.
pub fn parse(text: &str) -> Result<Vec<ChangeRecord>, PatchError> {
    scan(text).into_records()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(path: &str, content: &str) -> String {
        format!("<<<FILE: {path}>>>\n<<<REPLACEMENT_START>>>\n{content}<<<REPLACEMENT_END>>>\n")
    }

    #[test]
    fn parses_two_blocks_in_source_order() {
        let text = format!(
            "Here are the changes.\n{}Some prose in between.\n{}Done.",
            block("src/a.c", "int a;\n"),
            block("include/b.h", "#pragma once\nint b(void);\n")
        );

        let records = parse(&text).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path(), "src/a.c");
        assert_eq!(records[0].content(), "int a;\n");
        assert_eq!(records[1].path(), "include/b.h");
        assert_eq!(records[1].content(), "#pragma once\nint b(void);\n");
        assert!(records.iter().all(|r| !r.is_applied()));
    }

    #[test]
    fn scanner_works_with_iterator_adapters() {
        let text = format!("{}{}", block("a.c", "a\n"), block("b.c", "b\n"));
        let paths: Vec<String> = Scanner::new(&text)
            .filter_map(|b| match b {
                Block::Record(record) => Some(record.path().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(paths, vec!["a.c", "b.c"]);
        assert!(Scanner::new(&text).find(|b| matches!(b, Block::Aborted { .. })).is_none());
    }

    #[test]
    fn strips_only_one_leading_newline() {
        let text = "<<<FILE: a.txt>>>\n<<<REPLACEMENT_START>>>\n\nbody<<<REPLACEMENT_END>>>";
        let records = parse(text).expect("records");
        assert_eq!(records[0].content(), "\nbody");
    }

    #[test]
    fn content_is_verbatim_including_markers_lookalikes() {
        let text = "<<<FILE:a.py>>><<<REPLACEMENT_START>>>x = '<<<FILE: nope>>>'\n<<<REPLACEMENT_END>>>";
        let records = parse(text).expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path(), "a.py");
        assert_eq!(records[0].content(), "x = '<<<FILE: nope>>>'\n");
    }

    #[test]
    fn missing_start_marker_keeps_earlier_records() {
        let text = format!("{}<<<FILE: b.c>>>\nno start at all\n", block("a.c", "A\n"));
        let scan = scan(&text);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(
            scan.aborted.map(|(_, r)| r),
            Some(AbortReason::MissingStartMarker)
        );
        let records = scan.into_records().expect("partial records");
        assert_eq!(records[0].path(), "a.c");
    }

    #[test]
    fn missing_end_marker_aborts() {
        let text = format!(
            "{}<<<FILE: b.c>>>\n<<<REPLACEMENT_START>>>\ntruncated output",
            block("a.c", "A\n")
        );
        let scan = scan(&text);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(
            scan.aborted.map(|(_, r)| r),
            Some(AbortReason::MissingEndMarker)
        );
    }

    #[test]
    fn oversized_path_skips_block_and_continues() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        let text = format!("<<<FILE: {long}>>>\n{}", block("ok.c", "ok\n"));
        let scan = scan(&text);
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(
            scan.skipped[0].reason,
            SkipReason::PathTooLong {
                len: MAX_PATH_LEN + 1
            }
        );
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].path(), "ok.c");
        assert!(scan.aborted.is_none());
    }

    #[test]
    fn no_markers_is_not_found() {
        assert_eq!(parse("just an explanation"), Err(PatchError::NotFound));
        assert_eq!(
            parse("<<<FILE: a.c>>> but nothing else"),
            Err(PatchError::NotFound)
        );
    }

    #[test]
    fn unterminated_tag_aborts() {
        let scan = scan("<<<FILE: a.c\nno closing tag anywhere");
        assert!(scan.records.is_empty());
        assert_eq!(
            scan.aborted.map(|(_, r)| r),
            Some(AbortReason::UnterminatedFileTag)
        );
    }

    #[test]
    fn stops_after_max_records() {
        let text: String = (0..MAX_RECORDS + 5)
            .map(|i| block(&format!("f{i}.c"), "x\n"))
            .collect();
        let records = parse(&text).expect("records");
        assert_eq!(records.len(), MAX_RECORDS);
        assert_eq!(records[MAX_RECORDS - 1].path(), format!("f{}.c", MAX_RECORDS - 1));
    }

    #[test]
    fn path_spanning_lines_is_skipped() {
        let text = format!(
            "<<<FILE: broken\n<<<REPLACEMENT_START>>>\nlost\n<<<REPLACEMENT_END>>>\n{}",
            block("ok.c", "ok\n")
        );
        let scan = scan(&text);
        assert_eq!(scan.skipped[0].reason, SkipReason::MultiLinePath);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].path(), "ok.c");
    }

    #[test]
    fn path_is_trimmed() {
        let text = "<<<FILE:    src/a.c  >>>\n<<<REPLACEMENT_START>>>\nA\n<<<REPLACEMENT_END>>>";
        let records = parse(text).expect("records");
        assert_eq!(records[0].path(), "src/a.c");
    }
}
