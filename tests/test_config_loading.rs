use offline_proxy::config::ProxyConfig;
use offline_proxy::models::CacheAction;
use std::io::Write;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_shipped_config() {
    let config = ProxyConfig::from_file("offline_proxy.yaml");
    assert!(config.is_ok(), "Failed to load shipped config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_address, "0.0.0.0:8080");
    assert_eq!(config.chunk_size, 10_485_760);
    assert_eq!(config.large_object_patterns.len(), 3);
    assert_eq!(config.cache_rules.len(), 5);
    assert_eq!(
        config.cache_rules[1].action,
        CacheAction::SecondaryFetch {
            url_template: "/api/media/{id}".to_string()
        }
    );
    assert_eq!(config.precache, vec!["/", "/app.js", "/style.css"]);
    assert_eq!(config.sync_tag, "replay-queue");
    assert!(config.metrics_endpoint.unwrap().enabled);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
origin_url: "https://api.example.com"
"#,
    );

    let config = ProxyConfig::from_file(file.path());
    assert!(config.is_ok());

    let config = config.unwrap();
    assert_eq!(config.origin_url, "https://api.example.com");
    // Check defaults are applied
    assert_eq!(config.chunk_size, 10 * 1024 * 1024);
    assert_eq!(config.bypass_header, "x-cache-bypass");
    assert_eq!(config.max_secondary_depth, 3);
    assert!(config.cache_rules.is_empty());
    assert!(config.metrics_endpoint.is_none());
}

#[test]
fn test_load_invalid_chunk_size() {
    let file = write_config(
        r#"
chunk_size: 1024
"#,
    );

    let config = ProxyConfig::from_file(file.path());
    assert!(config.is_err(), "Should fail validation for chunk_size < 64KB");
}

#[test]
fn test_load_invalid_origin() {
    let file = write_config(
        r#"
origin_url: "ftp://files.example.com"
"#,
    );
    assert!(ProxyConfig::from_file(file.path()).is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let config = ProxyConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}

#[test]
fn test_origin_paths_resolve_against_origin() {
    let file = write_config(
        r#"
origin_url: "http://origin.local:8000"
precache: ["/", "/app.js", "https://cdn.example/lib.js"]
"#,
    );
    let config = ProxyConfig::from_file(file.path()).unwrap();

    let resolved: Vec<String> = config
        .precache
        .iter()
        .map(|entry| config.origin_url_for(entry).unwrap())
        .collect();
    assert_eq!(
        resolved,
        vec![
            "http://origin.local:8000/",
            "http://origin.local:8000/app.js",
            "https://cdn.example/lib.js",
        ]
    );
}
