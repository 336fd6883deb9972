//! YAML run documents and graph introspection

mod common;

use common::fixture_configs;
use dagrun::{ConfigManager, DagError, DependencyGraph};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[test]
fn test_yaml_document_fields() {
    let spec = fixture_configs().get_config("dag1").unwrap();

    assert_eq!(spec.name, "dag1");
    assert_eq!(spec.input, vec!["a"]);
    assert_eq!(spec.output, vec!["doubled", "doubled2"]);
    assert_eq!(spec.nodes.len(), 2);

    let n1 = &spec.nodes["n1"];
    assert_eq!(n1.name, "n1");
    assert_eq!(n1.processor, "double");
    assert_eq!(n1.params.get_i64("factor").unwrap(), 2);
    assert_eq!(n1.input.get("a").map(String::as_str), Some("a"));
    assert_eq!(n1.output.get("doubled").map(String::as_str), Some("b"));
    assert!(spec.nodes["n2"].params.is_empty());
    assert!(spec.config.is_none());
}

#[test]
fn test_cache_and_invalidate() {
    let configs = fixture_configs();
    let first = configs.get_config("dag1").unwrap();
    let second = configs.get_config("dag1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    configs.invalidate("dag1");
    let reloaded = configs.get_config("dag1").unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(*first, *reloaded);
}

#[test]
fn test_yml_extension_and_unknown_key() {
    let configs = fixture_configs();
    assert_eq!(configs.get_config("dag_circular").unwrap().name, "dag_circular");

    let err = configs.get_config("does_not_exist").unwrap_err();
    assert!(matches!(err, DagError::ConfigLoad { key, .. } if key == "does_not_exist"));
}

#[test]
fn test_graph_introspection() {
    let spec = fixture_configs().get_config("dag1").unwrap();
    let graph = DependencyGraph::build(&spec).unwrap();

    assert_eq!(graph.predecessors("n2"), vec!["n1"]);
    assert_eq!(
        graph.levels().unwrap(),
        vec![vec!["n1".to_string()], vec!["n2".to_string()]]
    );
    assert_eq!(graph.to_dot().matches("->").count(), 1);
    assert_eq!(spec.nodes_with_label("math"), vec!["n1", "n2"]);
    assert!(spec.nodes_with_label("io").is_empty());
}

/// Identifiers naming paths are refused, even when the target file exists
#[test]
fn test_run_identifier_cannot_leave_config_dir() {
    let configs = fixture_configs();
    for key in ["../fixtures/dag1", "./dag1", "nested/dag1", "..\\dag1", ""] {
        let err = configs.get_config(key).unwrap_err();
        assert!(
            matches!(&err, DagError::ConfigLoad { key: k, .. } if k == key),
            "{key}: {err}"
        );
    }
    assert!(configs.get_config("dag1").is_ok());
}
