use std::{
    env,
    path::{PathBuf, MAIN_SEPARATOR},
};

// Characters that end up around paths pasted from shells, file managers or
// chat clients. U+202A is the invisible embedding mark Windows copies along
// with "Copy as path".
const PASTE_JUNK: [char; 7] = [' ', '\t', '\n', '\r', '\'', '"', '\u{202a}'];

/// Canonicalize a user-supplied path string without touching the filesystem.
///
/// Surrounding quotes and whitespace are trimmed, trailing separators are
/// dropped (`a/b//` becomes `a/b`) and every `/` or `\` is rewritten to the
/// host separator. A path made only of separators stays a single separator.
pub fn clean_path(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| PASTE_JUNK.contains(&c));
    let stripped = trimmed.trim_end_matches(is_separator);

    if stripped.is_empty() && !trimmed.is_empty() {
        return MAIN_SEPARATOR.to_string();
    }

    stripped
        .chars()
        .map(|c| if is_separator(c) { MAIN_SEPARATOR } else { c })
        .collect()
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

pub fn weights_dir() -> PathBuf {
    env::var("STEM_BATCH_WEIGHTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("uvr5_weights"))
}

pub fn tmp_dir() -> PathBuf {
    env::var("STEM_BATCH_TMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            env::current_dir()
                .map(|cwd| cwd.join("temp"))
                .unwrap_or_else(|_| PathBuf::from("temp"))
        })
}

pub fn runner_script() -> PathBuf {
    env::var("STEM_BATCH_RUNNER_SCRIPT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("uvr_runner.py"))
}

pub fn python_program() -> PathBuf {
    env::var("STEM_BATCH_PYTHON")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("python3"))
}
