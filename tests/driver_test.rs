//! # 模块驱动集成测试
//!
//! 通过内核和内存运行时驱动完整的工作区操作：
//! - 激活 / 停用项目（解析闸门）
//! - 启停、刷新与更新
//! - 构建排队、依赖环与重复符号名
//! - 内核关闭

use std::sync::Arc;

use chips_workspace::{
    CoreError, InMemoryRuntime, KernelState, OperationCategory, ProjectDescriptor, ProjectId,
    Scope, State, StaticProjectMetadata, TransitionError, WorkspaceConfig, WorkspaceKernel,
};

// ============================================================================
// 测试辅助
// ============================================================================

async fn kernel_with(
    descriptors: Vec<ProjectDescriptor>,
) -> (WorkspaceKernel, Arc<InMemoryRuntime>) {
    let metadata = StaticProjectMetadata::new(descriptors).expect("元数据应合法");
    let (mut kernel, runtime) =
        WorkspaceKernel::with_memory_runtime(WorkspaceConfig::default(), Arc::new(metadata))
            .await
            .expect("内核应创建成功");
    kernel.start().await.expect("内核应启动成功");
    (kernel, runtime)
}

/// core <- app <- web
async fn layered_kernel() -> (WorkspaceKernel, Arc<InMemoryRuntime>) {
    kernel_with(vec![
        ProjectDescriptor::new("core"),
        ProjectDescriptor::new("app").requires("core", "*"),
        ProjectDescriptor::new("web").requires("app", "*"),
    ])
    .await
}

fn ids(list: &[&str]) -> Vec<ProjectId> {
    list.iter().map(|s| ProjectId::from(*s)).collect()
}

async fn state_of(kernel: &WorkspaceKernel, name: &str) -> State {
    kernel
        .unit(&ProjectId::from(name))
        .await
        .map(|u| u.state())
        .unwrap_or_default()
}

// ============================================================================
// 激活与停用
// ============================================================================

#[tokio::test]
async fn test_activate_brings_up_providers_first() {
    let (kernel, runtime) = layered_kernel().await;

    let report = kernel.activate_projects(&ids(&["app"])).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.processed, ids(&["core", "app"]));

    assert_eq!(runtime.calls_of("install").await, ids(&["core", "app"]));
    assert_eq!(runtime.calls_of("start").await, ids(&["core", "app"]));
    assert_eq!(state_of(&kernel, "core").await, State::Active);
    assert_eq!(state_of(&kernel, "app").await, State::Active);
    assert_eq!(state_of(&kernel, "web").await, State::Stateless);
    assert!(!kernel.model().is_any_in_flight().await);
}

#[tokio::test]
async fn test_activate_is_idempotent() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["app"])).await.unwrap();
    runtime.clear_calls().await;

    let report = kernel.activate_projects(&ids(&["app"])).await.unwrap();
    assert!(report.is_success());
    assert!(runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_deactivate_stops_requirers_and_blocks_resolution() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["web"])).await.unwrap();
    runtime.clear_calls().await;

    let report = kernel.deactivate_projects(&ids(&["app"])).await.unwrap();
    assert_eq!(report.processed, ids(&["web", "app"]));
    assert_eq!(runtime.calls_of("stop").await, ids(&["web", "app"]));
    assert_eq!(runtime.calls_of("refresh").await, ids(&["web", "app"]));

    // 解析被闸门拒绝，停在 Installed
    for name in ["web", "app"] {
        let unit = kernel.unit(&ProjectId::from(name)).await.unwrap();
        assert_eq!(unit.state(), State::Installed, "{name}");
        assert!(!unit.is_activated());
        assert!(!unit.is_in_flight());
    }
    assert_eq!(state_of(&kernel, "core").await, State::Active);
    assert!(!kernel
        .model()
        .resolution_gate()
        .allows(&ProjectId::from("app")));
}

#[tokio::test]
async fn test_reactivate_after_deactivate() {
    let (kernel, _runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["app"])).await.unwrap();
    kernel.deactivate_projects(&ids(&["app"])).await.unwrap();

    let report = kernel.activate_projects(&ids(&["app"])).await.unwrap();
    assert!(report.is_success());
    assert_eq!(state_of(&kernel, "app").await, State::Active);
    assert!(kernel.unit(&ProjectId::from("app")).await.unwrap().is_activated());
}

#[tokio::test]
async fn test_uninstall_detaches_module() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["core"])).await.unwrap();
    let module = kernel
        .unit(&ProjectId::from("core"))
        .await
        .unwrap()
        .module_id()
        .cloned()
        .unwrap();

    let report = kernel.driver().uninstall_projects(&ids(&["core"])).await.unwrap();
    assert!(report.is_success());

    let unit = kernel.unit(&ProjectId::from("core")).await.unwrap();
    assert_eq!(unit.state(), State::Uninstalled);
    assert!(unit.module_id().is_none());
    assert!(runtime.module_state(&module).await.is_none());
}

// ============================================================================
// 启停与刷新
// ============================================================================

#[tokio::test]
async fn test_stop_and_start_modules() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["web"])).await.unwrap();

    let report = kernel.stop_modules(&ids(&["core"])).await.unwrap();
    assert_eq!(report.processed, ids(&["web", "app", "core"]));
    for name in ["core", "app", "web"] {
        assert_eq!(state_of(&kernel, name).await, State::Resolved, "{name}");
    }

    runtime.clear_calls().await;
    let report = kernel.start_modules(&ids(&["app"])).await.unwrap();
    assert_eq!(report.processed, ids(&["core", "app"]));
    assert_eq!(runtime.calls_of("start").await, ids(&["core", "app"]));
    assert_eq!(state_of(&kernel, "web").await, State::Resolved);
}

#[tokio::test]
async fn test_start_requires_installed_module() {
    let (kernel, _runtime) = layered_kernel().await;
    let err = kernel.start_modules(&ids(&["app"])).await.unwrap_err();
    assert!(matches!(err, CoreError::ModuleNotInstalled(_)));
}

#[tokio::test]
async fn test_refresh_restarts_running_modules() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["app"])).await.unwrap();
    runtime.clear_calls().await;

    let report = kernel.refresh_projects(&ids(&["core"])).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.processed, ids(&["core", "app"]));
    assert_eq!(runtime.calls_of("stop").await, ids(&["app", "core"]));
    assert_eq!(runtime.calls_of("start").await, ids(&["core", "app"]));
    assert_eq!(state_of(&kernel, "core").await, State::Active);
    assert_eq!(state_of(&kernel, "app").await, State::Active);
}

// ============================================================================
// 更新与构建
// ============================================================================

#[tokio::test]
async fn test_update_reresolves_and_restarts() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["app"])).await.unwrap();
    runtime.clear_calls().await;

    let report = kernel.update_projects(&ids(&["core"])).await.unwrap();
    assert!(report.is_success());
    assert_eq!(runtime.calls_of("update").await, ids(&["core"]));
    assert_eq!(runtime.calls_of("refresh").await, ids(&["app"]));
    assert_eq!(runtime.calls_of("resolve").await, ids(&["core"]));
    assert_eq!(state_of(&kernel, "core").await, State::Active);
    assert_eq!(state_of(&kernel, "app").await, State::Active);
}

#[tokio::test]
async fn test_update_waits_for_running_build() {
    let (kernel, runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["app"])).await.unwrap();
    runtime.clear_calls().await;

    let core = ProjectId::from("core");
    kernel.driver().build_started(&[core.clone()]).await.unwrap();
    let report = kernel.update_projects(&[core.clone()]).await.unwrap();
    assert_eq!(report.skipped, vec![core.clone()]);
    assert!(runtime.calls_of("update").await.is_empty());

    let report = kernel.driver().build_finished(&core, true).await.unwrap();
    assert!(report.is_success());
    assert_eq!(runtime.calls_of("update").await, vec![core.clone()]);

    let unit = kernel.unit(&core).await.unwrap();
    assert!(unit.pending().is_empty());
    assert_eq!(unit.state(), State::Active);
}

#[tokio::test]
async fn test_failed_build_blocks_activation() {
    let (kernel, runtime) = layered_kernel().await;
    let core = ProjectId::from("core");
    kernel.driver().build_started(&[core.clone()]).await.unwrap();
    kernel.driver().build_finished(&core, false).await.unwrap();

    let report = kernel.activate_projects(&ids(&["app"])).await.unwrap();
    assert_eq!(report.skipped, ids(&["core", "app"]));
    assert!(runtime.calls().await.is_empty());

    let app = kernel.unit(&ProjectId::from("app")).await.unwrap();
    assert_eq!(app.error(), TransitionError::Dependency);
    assert_eq!(
        kernel.unit(&core).await.unwrap().error(),
        TransitionError::Build
    );

    // 构建成功后错误被清除
    kernel.driver().build_started(&[core.clone()]).await.unwrap();
    kernel.driver().build_finished(&core, true).await.unwrap();
    assert_eq!(
        kernel.unit(&core).await.unwrap().error(),
        TransitionError::NoError
    );
}

#[tokio::test]
async fn test_build_error_survives_external_stop() {
    let (kernel, runtime) = layered_kernel().await;
    let core = ProjectId::from("core");
    kernel.activate_projects(&[core.clone()]).await.unwrap();

    kernel.driver().build_started(&[core.clone()]).await.unwrap();
    kernel.driver().build_finished(&core, false).await.unwrap();

    let module = kernel.unit(&core).await.unwrap().module_id().cloned().unwrap();
    runtime.external_stop(&module).await.unwrap();

    let unit = kernel.unit(&core).await.unwrap();
    assert_eq!(unit.state(), State::Resolved);
    assert_eq!(unit.error(), TransitionError::Build);

    // 构建错误仍然阻止激活
    runtime.clear_calls().await;
    let report = kernel.activate_projects(&ids(&["app"])).await.unwrap();
    assert_eq!(report.skipped, ids(&["core", "app"]));
    assert!(runtime.calls().await.is_empty());
}

// ============================================================================
// 依赖环与重复符号名
// ============================================================================

#[tokio::test]
async fn test_cycle_marks_members() {
    let (kernel, runtime) = kernel_with(vec![
        ProjectDescriptor::new("a").requires("b", "*"),
        ProjectDescriptor::new("b").requires("a", "*"),
        ProjectDescriptor::new("c"),
    ])
    .await;

    let err = kernel.activate_projects(&ids(&["a"])).await.unwrap_err();
    assert!(matches!(err, CoreError::CircularDependency(_)));
    assert!(runtime.calls().await.is_empty());

    for name in ["a", "b"] {
        let unit = kernel.unit(&ProjectId::from(name)).await.unwrap();
        assert_eq!(unit.error(), TransitionError::Cycle, "{name}");
    }
    assert_eq!(
        kernel.unit(&ProjectId::from("c")).await.unwrap().error(),
        TransitionError::NoError
    );
}

#[tokio::test]
async fn test_duplicate_symbolic_name_is_skipped() {
    let (kernel, runtime) = kernel_with(vec![
        ProjectDescriptor::new("first").symbolic_name("shared"),
        ProjectDescriptor::new("second").symbolic_name("shared"),
    ])
    .await;

    kernel.activate_projects(&ids(&["first"])).await.unwrap();
    let report = kernel.activate_projects(&ids(&["second"])).await.unwrap();

    assert_eq!(report.skipped, ids(&["second"]));
    assert_eq!(runtime.calls_of("install").await, ids(&["first"]));
    let second = kernel.unit(&ProjectId::from("second")).await.unwrap();
    assert_eq!(second.error(), TransitionError::Duplicate);
    assert_eq!(second.state(), State::Stateless);
}

// ============================================================================
// 闭包预览与关闭
// ============================================================================

#[tokio::test]
async fn test_compute_closure_preview() {
    let (kernel, runtime) = layered_kernel().await;
    let closure = kernel
        .compute_closure(
            OperationCategory::DeactivateProject,
            &ids(&["core"]),
            Scope::All,
        )
        .await
        .unwrap();

    assert_eq!(closure.to_vec(), ids(&["web", "app", "core"]));
    assert!(runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_running_modules() {
    let (mut kernel, _runtime) = layered_kernel().await;
    kernel.activate_projects(&ids(&["web"])).await.unwrap();

    kernel.shutdown().await.unwrap();
    assert_eq!(kernel.state().await, KernelState::Stopped);
    assert!(!kernel.model().is_workspace_active());
    for name in ["core", "app", "web"] {
        assert_eq!(state_of(&kernel, name).await, State::Resolved, "{name}");
    }

    // 关闭后可以再次启动
    kernel.start().await.unwrap();
    assert!(kernel.state().await.is_running());
}
