//! 配置与工作区清单集成测试
//!
//! 测试配置文件、工作区清单的加载以及从文件创建内核的完整流程

use std::path::Path;

use chips_workspace::{
    ClosureKind, CoreError, KernelState, OperationCategory, ProjectId, ProjectMetadata, State,
    StaticProjectMetadata, WorkspaceConfig, WorkspaceKernel,
};
use chips_workspace::dependency::ActivationPolicy;
use tempfile::TempDir;

const MANIFEST: &str = r#"
projects:
  - id: core
    version: "1.4.0"
  - id: service
    requires:
      - name: core
        version: "^1.2"
  - id: ui
    activation: lazy
    requires:
      - name: service
  - id: sandbox
    enrolled: false
"#;

async fn write(path: &Path, content: &str) {
    tokio::fs::write(path, content).await.unwrap();
}

/// 测试 YAML 配置加载
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("workspace.yaml");
    write(
        &path,
        r#"
closure:
  activate_project: partial_graph
  deactivate_module: single
workspace_active: false
logging:
  level: debug
  json_format: true
"#,
    )
    .await;

    let config = WorkspaceConfig::from_file(&path).await.unwrap();
    assert_eq!(config.closure.activate_project, ClosureKind::PartialGraph);
    assert_eq!(config.closure.deactivate_module, ClosureKind::Single);
    // 未配置的类别使用默认值
    assert_eq!(config.closure.deactivate_project, ClosureKind::Requiring);
    assert!(!config.workspace_active);
    assert!(config.allow_self_reference);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
}

/// 测试 JSON 配置加载
#[tokio::test]
async fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("workspace.json");
    write(
        &path,
        r#"{ "closure": { "activate_module": "requiring_and_providing" }, "allow_self_reference": false }"#,
    )
    .await;

    let config = WorkspaceConfig::from_file(&path).await.unwrap();
    assert_eq!(
        config.closure.kind_for(OperationCategory::ActivateModule),
        ClosureKind::RequiringAndProviding
    );
    assert!(!config.allow_self_reference);
}

/// 测试非法的闭包类型在加载时被拒绝
#[tokio::test]
async fn test_illegal_closure_kind_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("workspace.yaml");
    write(&path, "closure:\n  deactivate_project: providing\n").await;

    let err = WorkspaceConfig::from_file(&path).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::IllegalClosureKind {
            category: OperationCategory::DeactivateProject,
            kind: ClosureKind::Providing,
        }
    ));
}

/// 测试配置文件不存在
#[tokio::test]
async fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = WorkspaceConfig::from_file(temp_dir.path().join("missing.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigLoadFailed(_)));
    assert_eq!(err.error_code(), chips_workspace::error_code::CONFIG_LOAD_FAILED);
}

/// 测试工作区清单加载
#[tokio::test]
async fn test_load_manifest() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("projects.yaml");
    write(&path, MANIFEST).await;

    let metadata = StaticProjectMetadata::from_file(&path).await.unwrap();
    assert_eq!(metadata.len(), 4);

    let service = ProjectId::from("service");
    assert_eq!(
        metadata.direct_providers(&service).unwrap(),
        vec![ProjectId::from("core")]
    );
    assert_eq!(
        metadata.direct_requirers(&service).unwrap(),
        vec![ProjectId::from("ui")]
    );
    assert_eq!(
        metadata.activation_policy(&ProjectId::from("ui")),
        ActivationPolicy::Lazy
    );
    assert!(!metadata.is_enrolled(&ProjectId::from("sandbox")));
}

/// 测试清单中的非法内容
#[tokio::test]
async fn test_invalid_manifest() {
    let bad_version = "projects:\n  - id: core\n    version: not-a-version\n";
    assert!(matches!(
        StaticProjectMetadata::from_manifest_str(bad_version),
        Err(CoreError::VersionParse(_))
    ));

    let duplicate = "projects:\n  - id: core\n  - id: core\n";
    assert!(matches!(
        StaticProjectMetadata::from_manifest_str(duplicate),
        Err(CoreError::InvalidMetadata(_))
    ));

    assert!(matches!(
        StaticProjectMetadata::from_manifest_str("projects: 42"),
        Err(CoreError::Yaml(_))
    ));
}

/// 测试从文件创建内核的完整流程
#[tokio::test]
async fn test_kernel_from_files() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("workspace.yaml");
    let manifest_path = temp_dir.path().join("projects.yaml");
    write(&config_path, "logging:\n  level: warn\n").await;
    write(&manifest_path, MANIFEST).await;

    let (mut kernel, runtime) = WorkspaceKernel::from_files(&config_path, &manifest_path)
        .await
        .unwrap();
    assert_eq!(kernel.state().await, KernelState::Initialized);
    assert_eq!(kernel.model().config().logging.level, "warn");

    kernel.start().await.unwrap();
    assert_eq!(kernel.units().await.len(), 4);

    let report = kernel
        .activate_projects(&[ProjectId::from("service")])
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(
        runtime.calls_of("install").await,
        vec![ProjectId::from("core"), ProjectId::from("service")]
    );
    assert_eq!(
        kernel.unit(&ProjectId::from("service")).await.unwrap().state(),
        State::Active
    );

    kernel.shutdown().await.unwrap();
}

/// 测试按配置初始化日志系统
#[tokio::test]
async fn test_init_logging_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let log_dir = temp_dir.path().join("logs");
    tokio::fs::create_dir_all(&log_dir).await.unwrap();
    let config = WorkspaceConfig::builder()
        .log_level("debug")
        .file_logging(&log_dir)
        .build();

    let guard = WorkspaceKernel::init_logging(&config).unwrap();
    tracing::info!(project = "core", "日志系统已就绪");

    // 重复初始化被拒绝
    let err = WorkspaceKernel::init_logging(&config).unwrap_err();
    assert!(matches!(err, CoreError::InitFailed(_)));
    drop(guard);
}
