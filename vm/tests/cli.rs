use assert_cmd::Command;
use rstest::rstest;
use std::path::Path;
use std::path::PathBuf;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("skadi-cli-{}-{}", std::process::id(), tag));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn push_utf8(b: &mut Vec<u8>, s: &str) {
    b.push(1);
    b.extend_from_slice(&(s.len() as u16).to_be_bytes());
    b.extend_from_slice(s.as_bytes());
}

fn push_class(b: &mut Vec<u8>, name_index: u16) {
    b.push(7);
    b.extend_from_slice(&name_index.to_be_bytes());
}

fn object_class_bytes() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&52u16.to_be_bytes());
    b.extend_from_slice(&3u16.to_be_bytes()); // pool count
    push_utf8(&mut b, "java/lang/Object"); // 1
    push_class(&mut b, 1); // 2
    b.extend_from_slice(&0x0021u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes()); // this
    b.extend_from_slice(&0u16.to_be_bytes()); // no super
    b.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    b.extend_from_slice(&0u16.to_be_bytes()); // fields
    b.extend_from_slice(&0u16.to_be_bytes()); // methods
    b.extend_from_slice(&0u16.to_be_bytes()); // attributes
    b
}

/// `class <name> { void work() {} }`
fn simple_class_bytes(name: &str) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&52u16.to_be_bytes());
    b.extend_from_slice(&8u16.to_be_bytes()); // pool count
    push_utf8(&mut b, name); // 1
    push_class(&mut b, 1); // 2
    push_utf8(&mut b, "java/lang/Object"); // 3
    push_class(&mut b, 3); // 4
    push_utf8(&mut b, "work"); // 5
    push_utf8(&mut b, "()V"); // 6
    push_utf8(&mut b, "Code"); // 7
    b.extend_from_slice(&0x0021u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes());
    b.extend_from_slice(&4u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    b.extend_from_slice(&0u16.to_be_bytes()); // fields
    b.extend_from_slice(&1u16.to_be_bytes()); // methods
    b.extend_from_slice(&0x0001u16.to_be_bytes());
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&6u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes()); // one attribute
    b.extend_from_slice(&7u16.to_be_bytes()); // "Code"
    b.extend_from_slice(&13u32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes()); // max_stack
    b.extend_from_slice(&1u16.to_be_bytes()); // max_locals
    b.extend_from_slice(&1u32.to_be_bytes());
    b.push(0xb1); // return
    b.extend_from_slice(&0u16.to_be_bytes()); // exception table
    b.extend_from_slice(&0u16.to_be_bytes()); // code attributes
    b.extend_from_slice(&0u16.to_be_bytes()); // class attributes
    b
}

fn write_class(dir: &Path, name: &str) {
    let path = dir.join(format!("{}.class", name));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, simple_class_bytes(name)).unwrap();
}

fn write_object(dir: &Path) {
    std::fs::create_dir_all(dir.join("java/lang")).unwrap();
    std::fs::write(dir.join("java/lang/Object.class"), object_class_bytes()).unwrap();
}

#[test]
fn analyses_a_class_end_to_end() {
    let dir = scratch_dir("analyse");
    write_object(&dir);
    write_class(&dir, "Main");

    let assert = Command::cargo_bin("skadi-vm")
        .unwrap()
        .args(["-c", dir.to_str().unwrap(), "Main"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("class Main"), "stdout was: {}", stdout);
    assert!(stdout.contains("super: java/lang/Object"), "stdout was: {}", stdout);
    assert!(
        stdout.contains("work()V  [1 instruction(s), 1 block(s), reducible]"),
        "stdout was: {}",
        stdout
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn dotted_class_names_resolve_like_slashed_ones() {
    let dir = scratch_dir("dotted");
    write_object(&dir);
    write_class(&dir, "com/example/App");

    let assert = Command::cargo_bin("skadi-vm")
        .unwrap()
        .args(["-c", dir.to_str().unwrap(), "com.example.App"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("class com/example/App"), "stdout was: {}", stdout);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listing_shows_visible_class_files() {
    let dir = scratch_dir("list");
    write_object(&dir);
    write_class(&dir, "Main");

    let assert = Command::cargo_bin("skadi-vm")
        .unwrap()
        .args(["-c", dir.to_str().unwrap(), "--list"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("Main.class"));
    assert!(stdout.contains("java/lang/Object.class"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[rstest]
#[case("NoSuchClass")]
#[case("com.example.Absent")]
fn missing_classes_fail_with_a_clean_error(#[case] class_name: &str) {
    let dir = scratch_dir("missing");

    Command::cargo_bin("skadi-vm")
        .unwrap()
        .args(["-c", dir.to_str().unwrap(), class_name])
        .assert()
        .failure()
        .stderr(predicates::str::contains("class not found"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn error_rendering_is_stable() {
    use skadi_runtime::error::JvmError;
    insta::assert_snapshot!(
        JvmError::ClassNotFound("com/example/Gone".to_string()).to_string(),
        @"class not found: com/example/Gone"
    );
    insta::assert_snapshot!(
        JvmError::Verify("operand stack underflow at pc 3".to_string()).to_string(),
        @"verify error: operand stack underflow at pc 3"
    );
}
