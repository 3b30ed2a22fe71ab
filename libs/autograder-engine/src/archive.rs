// Tar archives copied into the sandbox root before start
use crate::language::{InputMode, LanguageConfig, INPUT_FILE};
use std::collections::HashSet;
use std::io;

/// Build an uncompressed tar archive holding `files` at its top level.
///
/// Entries are regular files with mode 0644 and a fixed mtime so identical
/// inputs produce identical archives.
pub fn build_archive(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut builder = tar::Builder::new(Vec::new());

    for (name, data) in files {
        if name.is_empty() || name.contains('/') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("archive entry name must be a bare file name: {name:?}"),
            ));
        }
        if !seen.insert(*name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("duplicate archive entry: {name}"),
            ));
        }

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, name, *data)?;
    }

    builder.into_inner()
}

/// Archive for one run: the program under the language's file name, plus the
/// problem input when the language reads it from a file.
pub fn program_archive(
    language: &LanguageConfig,
    source: &[u8],
    input: &[u8],
) -> io::Result<Vec<u8>> {
    match language.input {
        InputMode::File => build_archive(&[(language.filename.as_str(), source), (INPUT_FILE, input)]),
        InputMode::Stdin => build_archive(&[(language.filename.as_str(), source)]),
    }
}
