//! # 生命周期状态机集成测试
//!
//! - 每个状态接受的命令（合法性表）
//! - 单元上的 begin / advance / commit / rollback 流程
//! - 外部转换与诊断码

use chips_workspace::{
    ActivationPolicy, Command, CoreError, ModuleUnit, ProjectId, RuntimeEventKind, State, Step,
    Transition, TransitionError,
};
use chips_workspace::module::UnitContext;

// ============================================================================
// 合法性表
// ============================================================================

const STATES: [State; 7] = [
    State::Stateless,
    State::Uninstalled,
    State::Installed,
    State::Resolved,
    State::Starting,
    State::Active,
    State::Stopping,
];

const COMMANDS: [Command; 8] = [
    Command::Install,
    Command::Uninstall,
    Command::Resolve(ActivationPolicy::Eager),
    Command::Resolve(ActivationPolicy::Lazy),
    Command::Start,
    Command::Stop,
    Command::Update,
    Command::Refresh,
];

fn accepted(state: State) -> Vec<Command> {
    match state {
        State::Stateless | State::Uninstalled => vec![Command::Install],
        State::Installed => vec![
            Command::Uninstall,
            Command::Resolve(ActivationPolicy::Eager),
            Command::Resolve(ActivationPolicy::Lazy),
            Command::Update,
            Command::Refresh,
        ],
        State::Resolved => vec![
            Command::Uninstall,
            Command::Start,
            Command::Update,
            Command::Refresh,
        ],
        State::Starting => vec![Command::Start, Command::Stop],
        State::Active => vec![Command::Stop],
        State::Stopping => vec![],
    }
}

#[test]
fn test_legality_grid() {
    let ctx = UnitContext {
        policy: ActivationPolicy::Eager,
        activated: true,
    };
    for state in STATES {
        let expected = accepted(state);
        for command in COMMANDS {
            let planned = state.plan(command, ctx).is_some();
            assert_eq!(
                planned,
                expected.contains(&command),
                "状态 {:?} 对命令 {:?} 的合法性不符",
                state,
                command
            );
        }
    }
}

#[test]
fn test_legal_transitions_match_grid() {
    for state in STATES {
        let from_grid: Vec<Transition> = {
            let mut list: Vec<Transition> =
                accepted(state).iter().map(|c| c.transition()).collect();
            list.sort();
            list.dedup();
            list
        };
        let mut listed = state.legal_transitions().to_vec();
        listed.sort();
        assert_eq!(listed, from_grid, "状态 {:?}", state);
    }
}

#[test]
fn test_settle_states() {
    let eager = UnitContext {
        policy: ActivationPolicy::Eager,
        activated: true,
    };
    let lazy = UnitContext {
        policy: ActivationPolicy::Lazy,
        activated: true,
    };
    let detached = UnitContext {
        policy: ActivationPolicy::Eager,
        activated: false,
    };

    assert_eq!(
        State::Resolved.plan(Command::Start, eager),
        Some(Step::Enter {
            enter: State::Active,
            settle: State::Active
        })
    );
    assert_eq!(
        State::Resolved.plan(Command::Start, lazy),
        Some(Step::Enter {
            enter: State::Starting,
            settle: State::Active
        })
    );
    // 懒加载解析后停在 Starting，启动开始等待按需加载
    assert_eq!(
        State::Starting.plan(Command::Start, lazy),
        Some(Step::Enter {
            enter: State::Starting,
            settle: State::Active
        })
    );
    assert_eq!(
        State::Resolved.plan(Command::Refresh, detached),
        Some(Step::Enter {
            enter: State::Installed,
            settle: State::Installed
        })
    );
    assert_eq!(
        State::Installed.plan(Command::Resolve(ActivationPolicy::Lazy), lazy),
        Some(Step::Enter {
            enter: State::Starting,
            settle: State::Starting
        })
    );
}

#[test]
fn test_state_table() {
    assert!(State::Stateless.permits(Transition::Install, State::Installed));
    assert!(State::Resolved.permits(Transition::Refresh, State::Installed));
    assert!(State::Starting.permits(Transition::Stop, State::Resolved));
    assert!(!State::Active.permits(Transition::Start, State::Active));
    assert!(!State::Installed.permits(Transition::Start, State::Active));
    // 外部转换可以到达任何状态
    assert!(State::Active.permits(Transition::External, State::Uninstalled));
}

// ============================================================================
// 单元转换流程
// ============================================================================

fn unit(policy: ActivationPolicy) -> ModuleUnit {
    ModuleUnit::new(ProjectId::from("app"), policy, true)
}

#[test]
fn test_begin_and_commit() {
    let mut unit = unit(ActivationPolicy::Eager);
    assert_eq!(unit.state(), State::Stateless);

    unit.begin(Command::Install).unwrap();
    assert!(unit.is_in_flight());
    assert_eq!(unit.state(), State::Installed);
    assert_eq!(unit.transition(), Transition::Install);
    assert_eq!(unit.prev_state(), State::Stateless);

    unit.commit().unwrap();
    assert!(!unit.is_in_flight());
    assert_eq!(unit.state(), State::Installed);
    assert_eq!(unit.error(), TransitionError::NoError);
}

#[test]
fn test_invalid_transition_leaves_unit_unchanged() {
    let mut unit = unit(ActivationPolicy::Eager);
    let err = unit.begin(Command::Start).unwrap_err();

    match err {
        CoreError::InvalidTransition {
            attempted, state, ..
        } => {
            assert_eq!(attempted, Transition::Start);
            assert_eq!(state, State::Stateless);
        }
        other => panic!("意外的错误: {other}"),
    }
    assert_eq!(unit.state(), State::Stateless);
    assert!(!unit.is_in_flight());
}

#[test]
fn test_transition_in_progress_rejected() {
    let mut unit = unit(ActivationPolicy::Eager);
    unit.begin(Command::Install).unwrap();
    unit.commit().unwrap();
    unit.begin(Command::Resolve(ActivationPolicy::Eager)).unwrap();

    let err = unit.begin(Command::Refresh).unwrap_err();
    assert!(matches!(err, CoreError::TransitionInProgress { .. }));
    assert_eq!(unit.transition(), Transition::Resolve);
}

#[test]
fn test_commit_rejects_unreachable_state() {
    let mut unit = unit(ActivationPolicy::Eager);
    unit.begin(Command::Install).unwrap();
    unit.advance(State::Active);

    let err = unit.commit().unwrap_err();
    assert!(matches!(err, CoreError::InconsistentState { .. }));
    assert!(unit.is_in_flight());
}

#[test]
fn test_rollback_restores_previous_configuration() {
    let mut unit = unit(ActivationPolicy::Eager);
    unit.begin(Command::Install).unwrap();
    unit.commit().unwrap();
    unit.begin(Command::Resolve(ActivationPolicy::Eager)).unwrap();
    unit.commit().unwrap();

    unit.begin(Command::Start).unwrap();
    unit.advance(State::Stopping);
    unit.rollback();

    assert_eq!(unit.state(), State::Resolved);
    assert_eq!(unit.transition(), Transition::Resolve);
    assert!(!unit.is_in_flight());

    // 没有进行中的转换时回滚不做任何事
    unit.set_error(TransitionError::Incomplete);
    unit.rollback();
    assert_eq!(unit.error(), TransitionError::Incomplete);
}

#[test]
fn test_lazy_start_waits_then_stop_supersedes() {
    let mut unit = unit(ActivationPolicy::Lazy);
    unit.begin(Command::Install).unwrap();
    unit.commit().unwrap();
    unit.begin(Command::Resolve(ActivationPolicy::Eager)).unwrap();
    unit.commit().unwrap();

    unit.begin(Command::Start).unwrap();
    assert!(unit.is_lazy_waiting());
    assert_eq!(unit.settle_state(), Some(State::Active));
    assert_eq!(unit.begin(Command::Start).unwrap(), Step::Unchanged);

    unit.begin(Command::Stop).unwrap();
    assert_eq!(unit.prev_state(), State::Starting);
    assert_eq!(unit.transition(), Transition::Stop);
    unit.commit().unwrap();
    assert_eq!(unit.state(), State::Resolved);
}

#[test]
fn test_external_transition() {
    let mut unit = unit(ActivationPolicy::Eager);
    unit.begin(Command::Install).unwrap();
    unit.commit().unwrap();

    unit.external(RuntimeEventKind::Resolved, None);
    assert_eq!(unit.state(), State::Resolved);
    assert_eq!(unit.transition(), Transition::External);
    assert_eq!(unit.prev_state(), State::Installed);

    unit.external(RuntimeEventKind::Uninstalled, Some(TransitionError::Uninstall));
    assert_eq!(unit.state(), State::Uninstalled);
    assert_eq!(unit.error(), TransitionError::Uninstall);
    assert!(unit.error().is_error());
}

#[test]
fn test_start_after_lazy_resolve_waits_for_demand_load() {
    let mut unit = unit(ActivationPolicy::Lazy);
    unit.begin(Command::Install).unwrap();
    unit.commit().unwrap();
    unit.begin(Command::Resolve(ActivationPolicy::Lazy)).unwrap();
    unit.advance(State::Resolved);
    unit.advance(State::Starting);
    unit.commit().unwrap();
    assert_eq!(unit.state(), State::Starting);
    assert!(!unit.is_lazy_waiting());

    unit.begin(Command::Start).unwrap();
    assert!(unit.is_lazy_waiting());
    assert_eq!(unit.prev_state(), State::Starting);
    assert_eq!(unit.begin(Command::Start).unwrap(), Step::Unchanged);

    unit.advance(State::Active);
    unit.commit().unwrap();
    assert_eq!(unit.state(), State::Active);
    assert_eq!(unit.transition(), Transition::Start);
}

#[test]
fn test_pending_transitions_are_ordered() {
    let mut unit = unit(ActivationPolicy::Eager);
    assert!(unit.add_pending(Transition::Update));
    assert!(unit.add_pending(Transition::Build));
    assert!(!unit.add_pending(Transition::Build));
    assert_eq!(unit.pending(), vec![Transition::Update, Transition::Build]);

    assert!(unit.remove_pending(Transition::Build));
    assert!(!unit.has_pending(Transition::Build));
}
