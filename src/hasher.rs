use anyhow::Result;
use blake3;
use ignore::WalkBuilder;
use std::{
    fs,
    hash::{Hash, Hasher},
    path::Path,
};

pub trait DigestHasher {
    fn input<I: Hash>(&mut self, input: I);
}

impl DigestHasher for blake3::Hasher {
    fn input<I: Hash>(&mut self, input: I) {
        struct StdHasher<'a>(&'a mut blake3::Hasher);

        impl<'a> Hasher for StdHasher<'a> {
            fn finish(&self) -> u64 {
                panic!();
            }

            fn write(&mut self, bytes: &[u8]) {
                self.0.update(bytes);
            }
        }

        input.hash(&mut StdHasher(self))
    }
}

/// Stable short identifier for a declaration-file directory. Engine resource
/// names derived from it must match between independent invocations, so this
/// is a pure function of the absolute path string.
pub fn location_hash<P: AsRef<Path>>(path: P) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.input(path.as_ref().to_string_lossy().as_ref());
    let digest = hasher.finalize();

    let mut value = 0u64;
    for byte in digest.as_bytes().iter().take(8) {
        value = (value << 8) | u64::from(*byte);
    }

    format!("{:08}", value % 100_000_000)
}

/// Recursive content hash of a build directory, honouring `.dockerignore`
/// the same way the build context itself does. Returns the digest and the
/// total number of bytes hashed.
pub fn tree_hash<P: AsRef<Path>>(root: P) -> Result<(String, u64)> {
    let root = root.as_ref();
    let mut hasher = blake3::Hasher::new();
    let mut hashed_size = 0;

    let walk = WalkBuilder::new(root)
        .add_custom_ignore_filename(".dockerignore")
        .ignore(false)
        .git_global(false)
        .git_ignore(false)
        .git_exclude(false)
        .hidden(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    for entry in walk {
        let entry = entry?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path());
        hasher.input(relative.to_string_lossy().as_ref());

        let contents = fs::read(entry.path())?;
        hashed_size += contents.len() as u64;
        hasher.update(&contents);
    }

    Ok((hasher.finalize().to_hex().to_string(), hashed_size))
}
