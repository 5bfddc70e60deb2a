//! Environment selection, includes and interpolation on an on-disk tree.

use trellis::config::ConfigError;
use trellis::{AppBuilder, Environment, EnvironmentResolver};

mod common;

fn project() -> common::ConfigTree {
    let tree = common::ConfigTree::new();
    tree.write(
        "app.yaml",
        r#"
include:
  - parts/extensions.yaml
  - parts/routes.yaml
server:
  bind_address: 127.0.0.1:${PORT:-8000}
"#,
    );
    tree.write(
        "parts/extensions.yaml",
        r#"
extensions: [security_headers, auth]
auth:
  tokens:
    ops: ${OPS_TOKEN}
"#,
    );
    tree.write(
        "parts/routes.yaml",
        r#"
routes:
  patterns:
    /admin/*:
      auth: true
"#,
    );
    tree.write(
        "app.production.yaml",
        r#"
server:
  bind_address: 0.0.0.0:80
  request_timeout_secs: 10
observability:
  log_format: json
"#,
    );
    tree
}

fn resolver(tree: &common::ConfigTree, vars: &'static [(&'static str, &'static str)]) -> EnvironmentResolver {
    EnvironmentResolver::with_lookup(move |name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    })
    .config_dir(tree.path())
}

#[test]
fn test_staging_without_override_uses_base() {
    let tree = project();
    let resolved = resolver(&tree, &[("TRELLIS_ENV", "staging"), ("OPS_TOKEN", "t")])
        .resolve()
        .unwrap();

    assert_eq!(resolved.environment, Environment::Staging);
    assert!(resolved.source.ends_with("app.yaml"));

    let app = AppBuilder::from_resolved(resolved).build().unwrap();
    assert_eq!(app.settings().server.bind_address, "127.0.0.1:8000");
    assert_eq!(app.extensions().ids(), vec!["security_headers", "auth"]);
    assert_eq!(app.document().origin("routes").map(|o| o.ends_with("routes.yaml")), Some(true));
}

#[test]
fn test_production_override_replaces_base_keys() {
    let tree = project();
    let resolved = resolver(
        &tree,
        &[("TRELLIS_ENV", "prod"), ("OPS_TOKEN", "t"), ("PORT", "9000")],
    )
    .resolve()
    .unwrap();

    assert_eq!(resolved.environment, Environment::Production);
    let app = AppBuilder::from_resolved(resolved).build().unwrap();
    assert_eq!(app.settings().server.bind_address, "0.0.0.0:80");
    assert_eq!(app.settings().server.request_timeout_secs, 10);
    // keys only the base defines survive
    assert!(app.document().contains_key("routes"));
    assert_eq!(app.environment(), &Environment::Production);
}

#[test]
fn test_force_dev_ignores_selector() {
    let tree = project();
    let resolved = resolver(
        &tree,
        &[("TRELLIS_ENV", "production"), ("TRELLIS_FORCE_DEV", "yes"), ("OPS_TOKEN", "t")],
    )
    .resolve()
    .unwrap();
    assert!(resolved.environment.is_development());
    assert!(resolved.source.ends_with("app.yaml"));
}

#[test]
fn test_missing_secret_fails_startup() {
    let tree = project();
    let err = resolver(&tree, &[]).resolve().unwrap_err();
    match err {
        ConfigError::MissingVariable { name, key_path } => {
            assert_eq!(name, "OPS_TOKEN");
            assert_eq!(key_path, "auth.tokens.ops");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_conflicting_includes_name_both_files() {
    let tree = project();
    tree.write("parts/more-routes.yaml", "routes:\n  defaults: {}\n");
    tree.write(
        "app.yaml",
        "include:\n  - parts/routes.yaml\n  - parts/more-routes.yaml\n",
    );

    let err = resolver(&tree, &[]).resolve().unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, ConfigError::Conflict { ref key, .. } if key == "routes"));
    assert!(message.contains("routes.yaml"));
    assert!(message.contains("more-routes.yaml"));
}
