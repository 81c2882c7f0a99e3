//! Plaintext artifacts: specs, execution, data and failure kinds

use dllpack_format::CodeHeader;
use dllpack_loader::{
    load_code, ArtifactContext, ErrorKind, HostError, HostRuntime, ImportOperation, ImportState,
    LoaderRef, ModuleRecord, PackConfig, PackedPackage, ResourceStorage,
};
use proptest::prelude::*;

use super::harness::*;

/// Host whose code objects are the marshalled bytes themselves.
struct BytesHost;

impl HostRuntime for BytesHost {
    type Code = Vec<u8>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<Vec<u8>, HostError> {
        Ok(bytes.to_vec())
    }

    fn exec_code(&mut self, _module: &ModuleRecord, _code: &Vec<u8>) -> Result<(), HostError> {
        Ok(())
    }
}

proptest! {
    #[test]
    fn prop_load_code_strips_only_the_header(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let framed = CodeHeader::unchecked(*b"TEST", 0).frame(&body);
        let image = ArtifactBuilder::new("pkg")
            .raw_module("pkg.blob", "pkg/blob.py", &framed)
            .image();

        let config = PackConfig::new("pkg");
        let storage = ResourceStorage::from_image("libpkg.so", image, &config).unwrap();
        let tables = storage.tables(&config.module_name);
        let ctx = ArtifactContext::init(config, tables, storage).unwrap();

        let entry = ctx.resolver().resolve("pkg.blob").entry().unwrap();
        prop_assert_eq!(load_code(&ctx, &BytesHost, entry).unwrap(), body);
    }
}

#[test]
fn test_spec_for_package_and_leaf() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = sample().write(dir.path());
    let ctx = open(&path, PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);
    let root = format!("{}{}", dir.path().display(), std::path::MAIN_SEPARATOR);

    let spec = package.make_spec("pkg", Some("pkg")).unwrap().unwrap();
    assert!(spec.is_package);
    assert_eq!(spec.origin, format!("{}pkg/__init__.py", root));
    assert_eq!(spec.submodule_search_locations, Some(vec!["pkg".to_string()]));
    assert_eq!(spec.parent, "pkg");
    assert_eq!(spec.loader, LoaderRef::Packed);

    let leaf = package.make_spec("pkg.tools.fmt", Some("ignored")).unwrap().unwrap();
    assert!(!leaf.is_package);
    assert_eq!(leaf.parent, "pkg.tools");
    assert_eq!(leaf.submodule_search_locations, None);
    assert_eq!(leaf.origin, format!("{}pkg/tools/fmt.py", root));

    assert!(package.make_spec("pkg.nothing", None).unwrap().is_none());
}

#[test]
fn test_implied_package_spec_uses_name_as_origin() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let spec = PackedPackage::new(&ctx)
        .make_spec("pkg.ns", Some("pkg/ns"))
        .unwrap()
        .unwrap();
    assert!(spec.is_package);
    assert!(spec.origin.ends_with("pkg.ns"));
    assert_eq!(spec.submodule_search_locations, Some(vec!["pkg/ns".to_string()]));
}

#[test]
fn test_create_and_exec_module() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();

    let spec = package.make_spec("pkg.sub", None).unwrap().unwrap();
    let module = package.create_module(&spec);
    assert_eq!(module.name, "pkg.sub");
    assert_eq!(module.package, "pkg");
    assert_eq!(module.file, spec.origin);

    package.exec_module(&mut host, &module).unwrap();
    assert_eq!(host.bodies(), vec!["pkg.sub body"]);
}

#[test]
fn test_main_runs_importer_setup_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();

    let module = package.exec_main(&mut host, Some("pkg")).unwrap();
    assert_eq!(module.name, "pkg");
    assert_eq!(host.bodies(), vec!["importer setup", "pkg init"]);
    assert!(host.executed.iter().all(|(name, _)| name == "pkg"));

    // Later imports, even as main, do not re-run setup
    package.exec_main(&mut host, Some("pkg")).unwrap();
    package.import_module(&mut host, "pkg.sub", None, false).unwrap();
    assert_eq!(
        host.bodies(),
        vec!["importer setup", "pkg init", "pkg init", "pkg.sub body"]
    );
}

#[test]
fn test_data_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);

    assert_eq!(package.data("pkg.template.txt").unwrap(), b"Hello, {name}!");
    let err = package.data("pkg.missing.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    assert!(err.to_string().contains("pkg.missing.txt"));

    // Module and data buckets are separate
    assert_eq!(package.data("pkg.sub").unwrap_err().kind(), ErrorKind::ResourceUnavailable);

    let mut names = package.data_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["pkg.template.txt", "pkg.tools.table.csv"]);
}

#[test]
fn test_module_names() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);

    let names = package.module_names("pkg").unwrap();
    assert_eq!(
        names,
        vec![("sub".to_string(), false), ("tools".to_string(), true)]
    );
    assert_eq!(
        package.module_names("").unwrap(),
        vec![
            ("pkg.sub".to_string(), false),
            ("pkg.tools".to_string(), true),
            ("pkg.tools.fmt".to_string(), false),
            ("pkg.ns.deep".to_string(), false),
        ]
    );
    assert!(package.module_names("pkg.ns").unwrap().contains(&("deep".to_string(), false)));
}

#[test]
fn test_truncated_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = ArtifactBuilder::new("pkg")
        .module("pkg", "pkg/__init__.py", "", true)
        .raw_module("pkg.short", "pkg/short.py", &[0u8; 15])
        .write(dir.path());
    let ctx = open(&path, PackConfig::new("pkg")).unwrap();
    let mut host = MockHost::default();

    let err = PackedPackage::new(&ctx)
        .import_module(&mut host, "pkg.short", None, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TruncatedModule);
    assert!(err.to_string().contains("pkg.short"));
    assert!(host.executed.is_empty());
}

#[test]
fn test_header_only_module_runs_empty_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = ArtifactBuilder::new("pkg")
        .raw_module("pkg", "pkg/__init__.py", &[0u8; 16])
        .write(dir.path());
    let ctx = open(&path, PackConfig::new("pkg")).unwrap();
    let mut host = MockHost::default();
    PackedPackage::new(&ctx).import_module(&mut host, "pkg", None, false).unwrap();
    assert_eq!(host.bodies(), vec![""]);
}

#[test]
fn test_failure_kinds_surface_with_module_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = ArtifactBuilder::new("pkg")
        .module("pkg", "pkg/__init__.py", "", true)
        .module("pkg.boom", "pkg/boom.py", RAISE, false)
        .module("pkg.garbled", "pkg/garbled.py", CORRUPT, false)
        .missing_module("pkg.lost", "pkg/lost.py")
        .write(dir.path());
    let ctx = open(&path, PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();

    let cases = [
        ("pkg.boom", ErrorKind::ExecutionError),
        ("pkg.garbled", ErrorKind::DeserializeError),
        ("pkg.lost", ErrorKind::ResourceUnavailable),
        ("pkg.absent", ErrorKind::ModuleNotFound),
    ];
    for (name, kind) in cases {
        let err = package.import_module(&mut host, name, None, false).unwrap_err();
        assert_eq!(err.kind(), kind, "{name}");
        assert!(err.to_string().contains(name), "{err}");
        assert!(err.to_string().contains(&kind.to_string()), "{err}");
    }
}

#[test]
fn test_state_machine_records_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = ArtifactBuilder::new("pkg")
        .module("pkg", "pkg/__init__.py", "", true)
        .module("pkg.boom", "pkg/boom.py", RAISE, false)
        .write(dir.path());
    let ctx = open(&path, PackConfig::new("pkg")).unwrap();
    let mut host = MockHost::default();

    let mut op = ImportOperation::new(&ctx, "pkg.boom");
    op.resolve().unwrap();
    op.build_spec(None).unwrap();
    op.create_module().unwrap();
    assert!(op.execute(&mut host, false).is_err());
    assert_eq!(op.state(), ImportState::Failed(ErrorKind::ExecutionError));

    // A failed import cannot be resumed
    let err = op.execute(&mut host, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert_eq!(host.executed.len(), 1);
}

#[test]
fn test_redirect_through_exec_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&sample().write(dir.path()), PackConfig::new("pkg")).unwrap();
    let package = PackedPackage::new(&ctx);
    let mut host = MockHost::default();

    let spec = package.make_spec("pkg._speedups", None).unwrap().unwrap();
    assert_eq!(spec.loader, LoaderRef::NotHandled);
    assert!(spec.origin.ends_with("pkg/_speedups.cpython.so"));

    let module = package.create_module(&spec);
    let err = package.exec_module(&mut host, &module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleNotFound);
}

#[test]
fn test_context_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample().write(dir.path());
    let config_path = dir.path().join("pack.toml");
    std::fs::write(&config_path, "module_name = \"pkg\"\n").unwrap();

    let config = PackConfig::from_file(&config_path).unwrap();
    let ctx = open(&path, config).unwrap();
    assert_eq!(ctx.name(), "pkg");
    assert!(!ctx.is_encrypted());
    ctx.teardown();
}

#[test]
fn test_file_without_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.so");
    std::fs::write(&path, b"just an ordinary shared object").unwrap();
    let err = open(&path, PackConfig::new("pkg")).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SystemError);
}
