//! Encrypted artifacts

use dllpack_loader::{ErrorKind, PackConfig, PackedPackage};

use super::harness::*;

fn set_key(variable: &str, key: &[u8]) {
    let value = format!("base64:{}", base64_encode(key));
    std::env::set_var(variable, value);
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[test]
fn test_encrypted_roundtrip() {
    init_tracing();
    let variable = "DLLPACK_E2E_KEY_ROUNDTRIP";
    let dir = tempfile::tempdir().unwrap();
    let path = sample().encrypted(KEY).write(dir.path());

    set_key(variable, KEY);
    let ctx = open(&path, PackConfig::new("pkg").with_encryption(variable)).unwrap();
    assert!(ctx.is_encrypted());
    assert!(std::env::var_os(variable).is_none(), "key must be cleared after init");

    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();
    package.exec_main(&mut host, None).unwrap();
    package.import_module(&mut host, "pkg.tools.fmt", None, false).unwrap();
    assert_eq!(host.bodies(), vec!["importer setup", "pkg init", "fmt body"]);
    assert_eq!(package.data("pkg.template.txt").unwrap(), b"Hello, {name}!");
    ctx.teardown();
}

#[test]
fn test_raw_utf8_key() {
    let variable = "DLLPACK_E2E_KEY_UTF8";
    let dir = tempfile::tempdir().unwrap();
    let path = sample().encrypted(KEY).write(dir.path());

    std::env::set_var(variable, std::str::from_utf8(KEY).unwrap());
    let ctx = open(&path, PackConfig::new("pkg").with_encryption(variable)).unwrap();
    assert_eq!(
        PackedPackage::new(&ctx).data("pkg.tools.table.csv").unwrap(),
        b"a,b\n1,2\n"
    );
}

#[test]
fn test_wrong_key_never_yields_plaintext() {
    let variable = "DLLPACK_E2E_KEY_WRONG";
    let dir = tempfile::tempdir().unwrap();
    let path = sample().encrypted(KEY).write(dir.path());

    set_key(variable, b"a-completely-different-32b-key!!");
    let ctx = open(&path, PackConfig::new("pkg").with_encryption(variable)).unwrap();
    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();

    for name in ["pkg", "pkg.sub", "pkg.tools", "pkg.tools.fmt"] {
        match package.import_module(&mut host, name, None, false) {
            Err(err) => assert!(
                matches!(
                    err.kind(),
                    ErrorKind::DecodeError
                        | ErrorKind::InvalidFraming
                        | ErrorKind::TruncatedModule
                        | ErrorKind::DeserializeError
                ),
                "{err}"
            ),
            Ok(_) => panic!("{name} imported with the wrong key"),
        }
    }
}

#[test]
fn test_missing_key_variable() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample().encrypted(KEY).write(dir.path());
    let err = open(&path, PackConfig::new("pkg").with_encryption("DLLPACK_E2E_KEY_UNSET"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::PlatformCryptoError);
}

#[test]
fn test_bad_key_length() {
    let variable = "DLLPACK_E2E_KEY_SHORT";
    let dir = tempfile::tempdir().unwrap();
    let path = sample().encrypted(KEY).write(dir.path());

    std::env::set_var(variable, "too short");
    let err = open(&path, PackConfig::new("pkg").with_encryption(variable))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::PlatformCryptoError);
    assert!(std::env::var_os(variable).is_none());
}

#[test]
fn test_plaintext_resource_in_encrypted_artifact() {
    let variable = "DLLPACK_E2E_KEY_PLAIN_RESOURCE";
    let dir = tempfile::tempdir().unwrap();
    // Packed without encryption, loaded as if encrypted: the code header is
    // read as a frame header, which yields no usable IV.
    let path = ArtifactBuilder::new("pkg")
        .module("pkg", "pkg/__init__.py", "short", true)
        .write(dir.path());

    set_key(variable, KEY);
    let ctx = open(&path, PackConfig::new("pkg").with_encryption(variable)).unwrap();
    let mut host = MockHost::default();
    let err = PackedPackage::new(&ctx)
        .import_module(&mut host, "pkg", None, false)
        .unwrap_err();
    assert!(
        matches!(
            err.kind(),
            ErrorKind::InvalidFraming | ErrorKind::PlatformCryptoError
        ),
        "{err}"
    );
    assert!(err.to_string().contains("pkg"));
}
