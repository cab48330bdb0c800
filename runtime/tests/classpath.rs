use skadi_runtime::class_loader::classpath::{ClassPath, ClassPathError};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A scratch directory unique to this test invocation.
fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "skadi-classpath-{}-{}-{}",
        std::process::id(),
        tag,
        DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

struct JarSpec<'a> {
    name: &'a str,
    contents: &'a [u8],
    deflate: bool,
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::DeflateEncoder::new(data, flate2::Compression::default())
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Assembles a single-disk ZIP with local headers, a central directory and
/// an end-of-central-directory record. CRCs are zero; the store does not
/// check them.
fn build_jar(entries: &[JarSpec<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let payload = if entry.deflate {
            deflate(entry.contents)
        } else {
            entry.contents.to_vec()
        };
        let method: u16 = if entry.deflate { 8 } else { 0 };
        let local_offset = out.len() as u32;

        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&0u32.to_le_bytes()); // crc32
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.contents.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&payload);

        central.push((entry.name, method, payload.len() as u32, entry.contents.len() as u32, local_offset));
    }

    let cd_offset = out.len() as u32;
    for (name, method, compressed, uncompressed, local_offset) in &central {
        out.extend_from_slice(&0x02014b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version made by
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&0u32.to_le_bytes()); // crc32
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out.extend_from_slice(&0u16.to_le_bytes()); // disk start
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&local_offset.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_offset;

    out.extend_from_slice(&0x06054b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // disk with cd
    out.extend_from_slice(&(central.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len
    out
}

#[test]
fn stored_and_deflated_entries_round_trip() {
    let dir = scratch_dir("jar");
    let a_contents = b"stored contents of a".repeat(3);
    let b_contents = b"deflated contents of b, repeated to make compression worthwhile ".repeat(50);

    let jar = build_jar(&[
        JarSpec { name: "a.class", contents: &a_contents, deflate: false },
        JarSpec { name: "b.class", contents: &b_contents, deflate: true },
    ]);
    let jar_path = dir.join("lib.jar");
    std::fs::write(&jar_path, &jar).unwrap();

    let cp = ClassPath::new(jar_path.to_str().unwrap()).unwrap();
    assert_eq!(cp.lookup("a.class").unwrap().as_deref(), Some(a_contents.as_slice()));
    assert_eq!(cp.lookup("b.class").unwrap().as_deref(), Some(b_contents.as_slice()));
    assert_eq!(cp.lookup("c.class").unwrap(), None);

    let mut names = cp.class_file_names();
    names.sort();
    assert_eq!(names, vec!["a.class".to_string(), "b.class".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[rstest::rstest]
#[case("../escape.class")]
#[case("a/../escape.class")]
#[case("..")]
fn dot_dot_names_are_rejected_without_io(#[case] name: &str) {
    let dir = scratch_dir("dotdot");
    std::fs::write(dir.join("escape.class"), b"x").unwrap();
    let cp = ClassPath::new(dir.to_str().unwrap()).unwrap();

    assert_eq!(cp.lookup(name).unwrap(), None);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn truncated_archive_is_corrupt() {
    let dir = scratch_dir("trunc");
    let jar = build_jar(&[JarSpec { name: "a.class", contents: b"abc", deflate: false }]);
    let jar_path = dir.join("short.jar");
    std::fs::write(&jar_path, &jar[..jar.len() - 1]).unwrap();

    assert!(matches!(
        ClassPath::new(jar_path.to_str().unwrap()),
        Err(ClassPathError::Corrupt(_))
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unsupported_compression_method_is_corrupt() {
    let dir = scratch_dir("method");
    let mut jar = build_jar(&[JarSpec { name: "a.class", contents: b"abc", deflate: false }]);
    // Patch the compression method in the central directory to bzip2 (12).
    let cd_signature = 0x02014b50u32.to_le_bytes();
    let cd = jar
        .windows(4)
        .rposition(|w| w == &cd_signature[..])
        .unwrap();
    jar[cd + 10] = 12;
    let jar_path = dir.join("weird.jar");
    std::fs::write(&jar_path, &jar).unwrap();

    assert!(matches!(
        ClassPath::new(jar_path.to_str().unwrap()),
        Err(ClassPathError::Corrupt(_))
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn duplicate_entry_names_are_corrupt() {
    let dir = scratch_dir("dup");
    let jar = build_jar(&[
        JarSpec { name: "a.class", contents: b"one", deflate: false },
        JarSpec { name: "a.class", contents: b"two", deflate: false },
    ]);
    let jar_path = dir.join("dup.jar");
    std::fs::write(&jar_path, &jar).unwrap();

    assert!(matches!(
        ClassPath::new(jar_path.to_str().unwrap()),
        Err(ClassPathError::Corrupt(_))
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn first_entry_wins_across_the_path() {
    let first = scratch_dir("first");
    let second = scratch_dir("second");
    std::fs::write(first.join("Dup.class"), b"from first").unwrap();
    std::fs::write(second.join("Dup.class"), b"from second").unwrap();
    std::fs::write(second.join("Only.class"), b"only in second").unwrap();

    // Empty classpath segments are skipped.
    let spec = format!(":{}::{}:", first.display(), second.display());
    let cp = ClassPath::new(&spec).unwrap();

    assert_eq!(cp.lookup("Dup.class").unwrap().as_deref(), Some(b"from first".as_slice()));
    assert_eq!(cp.lookup("Only.class").unwrap().as_deref(), Some(b"only in second".as_slice()));

    let _ = std::fs::remove_dir_all(&first);
    let _ = std::fs::remove_dir_all(&second);
}

#[test]
fn directory_lookup_reads_nested_paths() {
    let dir = scratch_dir("nested");
    std::fs::create_dir_all(dir.join("com/example")).unwrap();
    std::fs::write(dir.join("com/example/Foo.class"), b"foo bytes").unwrap();

    let cp = ClassPath::new(dir.to_str().unwrap()).unwrap();
    assert_eq!(
        cp.lookup("com/example/Foo.class").unwrap().as_deref(),
        Some(b"foo bytes".as_slice())
    );
    assert_eq!(cp.class_file_names(), vec!["com/example/Foo.class".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}
