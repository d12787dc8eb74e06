use std::io::Write;

use bosh_session::{BoshConfig, BoshError};

#[test]
fn server_config_loads_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "domain = \"chat.example\"\nmax_wait = 45\nhold_requests = 2\ncontent_type = \"text/xml\""
    )
    .expect("write config");

    let cfg = BoshConfig::from_path(file.path()).expect("load config");

    assert_eq!(cfg.domain, "chat.example");
    assert_eq!(cfg.max_wait, 45);
    assert_eq!(cfg.hold_requests, 2);
    assert_eq!(cfg.content_type, "text/xml");
    assert_eq!(cfg.max_inactivity, BoshConfig::default().max_inactivity);
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = BoshConfig::from_path(dir.path().join("absent.toml")).expect_err("missing file");
    assert!(matches!(err, BoshError::Io(_)));
}
