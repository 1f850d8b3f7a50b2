//! `router_contract` 集成测试：注册、移除、查询与分派策略。
//!
//! # 测试目标（Why）
//! - 注册必须全有或全无：冲突的控制器不能留下任何处理函数；
//! - 未知操作码、缺失操作码、校验失败与处理函数失败各自映射到稳定的处置与错误码；
//! - 校验链按“处理函数专属 → 控制器级（声明顺序）”执行，标签只匹配带标签的处理函数。
//!
//! # 结构安排（How）
//! - 以不依赖传输的 `StubSession` 直接调用 `PacketRouter::handle`；
//! - 控制器状态通过 `Arc` 共享给测试断言。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tern_codec::{InboundPacket, Opcode, OutboundPacket};
use tern_core::{
    CoreError, codes,
    config::{RouterConfig, UnknownOpcodePolicy},
};
use tern_router::{
    Controller, HandlerSet, OpcodePacketRouter, PacketValidator, RouterError, ValidationError,
};
use tern_transport::{ConnectionError, ConnectionId, DispatchError, PacketRouter, Session};
use tracing_test::traced_test;

struct StubSession {
    id: ConnectionId,
}

impl StubSession {
    fn new() -> Self {
        Self {
            id: ConnectionId::next(),
        }
    }
}

impl Session for StubSession {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<std::net::SocketAddr> {
        None
    }

    fn is_open(&self) -> bool {
        true
    }

    fn post(&self, _packet: OutboundPacket) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn close(&self) {}
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn step(log: &Log, name: &'static str) -> impl PacketValidator {
    let log = Arc::clone(log);
    move |_: &dyn Session, _: &InboundPacket<'_>| -> Result<(), ValidationError> {
        log.lock().push(name);
        Ok(())
    }
}

fn non_empty(log: &Log) -> impl PacketValidator {
    let log = Arc::clone(log);
    move |_: &dyn Session, packet: &InboundPacket<'_>| -> Result<(), ValidationError> {
        log.lock().push("non_empty");
        if packet.payload().is_empty() {
            Err(ValidationError::new("payload must not be empty"))
        } else {
            Ok(())
        }
    }
}

/// 登录控制器：1、2 带 `auth` 标签，3 不带。
#[derive(Default, Debug)]
struct Login {
    handled: AtomicUsize,
    log: Log,
}

impl Login {
    fn login(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("login");
        Ok(())
    }

    fn logout(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("logout");
        Ok(())
    }

    fn ping(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("ping");
        Ok(())
    }
}

impl Controller for Login {
    fn register_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers
            .on(1u32, Self::login)
            .tag("auth")
            .validator(step(&self.log, "own"));
        handlers.on(2u32, Self::logout).tag("auth");
        handlers.on(3u32, Self::ping);
        handlers
            .validate_tagged("auth", non_empty(&self.log))
            .validate_all(step(&self.log, "all"));
    }
}

/// 与 `Login` 在操作码 2 上冲突。
struct Chat;

impl Chat {
    fn say(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        Ok(())
    }
}

impl Controller for Chat {
    fn register_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers.on(10u32, Self::say);
        handlers.on(2u32, Self::say);
    }
}

struct Shop;

impl Shop {
    fn browse(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        Ok(())
    }

    fn buy(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
        Err(CoreError::new("shop.out_of_stock", "item is out of stock"))
    }
}

impl Controller for Shop {
    fn register_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers.on(20u32, Self::browse);
        handlers.on(21u32, Self::buy);
    }
}

/// 同一控制器内重复声明同一操作码。
struct Twice;

impl Controller for Twice {
    fn register_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers.on(5u32, |_: &Twice, _: &dyn Session, _: InboundPacket<'_>| Ok(()));
        handlers.on(5u32, |_: &Twice, _: &dyn Session, _: InboundPacket<'_>| Ok(()));
    }
}

fn dispatch(
    router: &OpcodePacketRouter,
    opcode: u32,
    payload: &[u8],
) -> Result<(), DispatchError> {
    router.handle(&StubSession::new(), InboundPacket::new(Opcode(opcode), payload))
}

#[test]
fn handlers_reach_controller_state() {
    let router = OpcodePacketRouter::new();
    let login = Arc::new(Login::default());
    router
        .register_shared(Arc::clone(&login))
        .expect("注册登录控制器失败");

    assert_eq!(router.controller_count(), 1);
    assert_eq!(router.handler_count(), 3);
    assert!(router.contains_opcode(3u32));

    dispatch(&router, 3, b"").expect("分派 ping 失败");
    dispatch(&router, 2, b"x").expect("分派 logout 失败");
    assert_eq!(login.handled.load(Ordering::SeqCst), 2);
}

#[test]
fn duplicate_controller_is_rejected() {
    let router = OpcodePacketRouter::new();
    router.register(Shop).expect("首次注册失败");
    let error = router.register(Shop).expect_err("重复注册应失败");
    assert!(matches!(error, RouterError::DuplicateController { .. }));
    assert_eq!(
        CoreError::from(error).code(),
        codes::ROUTER_DUPLICATE_CONTROLLER
    );
    assert_eq!(router.controller_count(), 1);
}

/// `Chat` 的 10 号处理函数不冲突，但 2 号冲突：整个 `Chat` 都不应留下。
#[test]
fn duplicate_opcode_leaves_router_untouched() {
    let router = OpcodePacketRouter::new();
    router.register(Login::default()).expect("注册登录控制器失败");

    let error = router.register(Chat).expect_err("冲突注册应失败");
    assert_eq!(
        error,
        RouterError::DuplicateOpcode {
            controller: std::any::type_name::<Chat>(),
            opcode: Opcode(2),
        }
    );
    assert_eq!(router.controller_count(), 1);
    assert_eq!(router.handler_count(), 3);
    assert!(!router.contains_opcode(10u32), "冲突控制器不应部分注册");
    assert!(router.try_get::<Chat>().is_none());
}

#[test]
fn duplicate_opcode_within_one_controller_is_rejected() {
    let router = OpcodePacketRouter::new();
    let error = router.register(Twice).expect_err("自身冲突应失败");
    assert!(matches!(error, RouterError::DuplicateOpcode { opcode: Opcode(5), .. }));
    assert_eq!(router.controller_count(), 0);
    assert_eq!(router.handler_count(), 0);
}

#[test]
fn remove_rebuilds_from_remaining_controllers() {
    let router = OpcodePacketRouter::new();
    router.register(Login::default()).expect("注册登录控制器失败");
    router.register(Shop).expect("注册商店控制器失败");
    assert_eq!(router.handler_count(), 5);

    assert!(router.remove::<Login>());
    assert!(!router.remove::<Login>(), "重复移除应返回 false");
    assert_eq!(router.controller_count(), 1);
    assert!(!router.contains_opcode(1u32));
    assert!(router.contains_opcode(20u32));

    router.register(Chat).expect("移除后操作码 2 应可再次注册");
    assert_eq!(router.handler_count(), 4);
}

#[test]
fn get_returns_registered_instance() {
    let router = OpcodePacketRouter::new();
    let missing = router.get::<Login>().expect_err("未注册时应失败");
    assert_eq!(
        CoreError::from(missing).code(),
        codes::ROUTER_CONTROLLER_NOT_FOUND
    );

    let login = Arc::new(Login::default());
    router
        .register_shared(Arc::clone(&login))
        .expect("注册登录控制器失败");
    let found = router.get::<Login>().expect("应能取回控制器");
    assert!(Arc::ptr_eq(&found, &login));
    assert!(router.try_get::<Shop>().is_none());
}

#[test]
fn unknown_opcode_follows_policy() {
    let strict = OpcodePacketRouter::new();
    match dispatch(&strict, 99, b"") {
        Err(DispatchError::Fatal(error)) => assert_eq!(error.code(), codes::ROUTER_UNKNOWN_OPCODE),
        other => panic!("默认策略应为致命错误: {other:?}"),
    }

    let ignoring = OpcodePacketRouter::with_policy(UnknownOpcodePolicy::Ignore);
    dispatch(&ignoring, 99, b"").expect("忽略策略不应报错");

    let config = RouterConfig {
        unknown_opcode: UnknownOpcodePolicy::LogAndDrop,
    };
    let dropping = OpcodePacketRouter::from_config(&config);
    assert_eq!(dropping.unknown_opcode_policy(), UnknownOpcodePolicy::LogAndDrop);
    match dispatch(&dropping, 99, b"") {
        Err(DispatchError::Rejected(error)) => {
            assert_eq!(error.code(), codes::ROUTER_UNKNOWN_OPCODE)
        }
        other => panic!("记录后丢弃策略应返回 Rejected: {other:?}"),
    }
}

#[test]
fn missing_opcode_is_fatal() {
    let router = OpcodePacketRouter::with_policy(UnknownOpcodePolicy::Ignore);
    let outcome = router.handle(&StubSession::new(), InboundPacket::untagged(b"raw"));
    match outcome {
        Err(DispatchError::Fatal(error)) => {
            assert_eq!(error.code(), codes::PROTOCOL_MISSING_OPCODE)
        }
        other => panic!("缺失操作码应为致命错误: {other:?}"),
    }
}

/// 1 号：专属 → 标签 → 全体；3 号无标签：只有全体校验器。
#[test]
fn validators_run_in_declared_order() {
    let router = OpcodePacketRouter::new();
    let login = Arc::new(Login::default());
    router
        .register_shared(Arc::clone(&login))
        .expect("注册登录控制器失败");

    dispatch(&router, 1, b"user").expect("分派 login 失败");
    assert_eq!(
        *login.log.lock(),
        vec!["own", "non_empty", "all", "login"]
    );

    login.log.lock().clear();
    dispatch(&router, 3, b"").expect("分派 ping 失败");
    assert_eq!(*login.log.lock(), vec!["all", "ping"]);
}

#[test]
fn validation_failure_rejects_only_the_packet() {
    let router = OpcodePacketRouter::new();
    let login = Arc::new(Login::default());
    router
        .register_shared(Arc::clone(&login))
        .expect("注册登录控制器失败");

    match dispatch(&router, 2, b"") {
        Err(DispatchError::Rejected(error)) => {
            assert_eq!(error.code(), codes::ROUTER_VALIDATION_FAILED);
            assert!(error.message().contains("payload must not be empty"));
        }
        other => panic!("校验失败应返回 Rejected: {other:?}"),
    }
    assert_eq!(*login.log.lock(), vec!["non_empty"], "校验链应在首个失败处停止");
    assert_eq!(login.handled.load(Ordering::SeqCst), 0);
}

#[test]
fn handler_error_is_fatal_with_cause() {
    let router = OpcodePacketRouter::new();
    router.register(Shop).expect("注册商店控制器失败");
    dispatch(&router, 20, b"").expect("浏览应成功");

    match dispatch(&router, 21, b"") {
        Err(DispatchError::Fatal(error)) => {
            assert_eq!(error.code(), codes::ROUTER_HANDLER_FAILED);
            assert!(error.message().contains("0x00000015"));
            assert!(error.cause().is_some(), "处理函数的错误应作为根因保留");
        }
        other => panic!("处理函数失败应为致命错误: {other:?}"),
    }
}

#[test]
#[traced_test]
fn registration_changes_are_logged() {
    let router = OpcodePacketRouter::new();
    router.register(Shop).expect("注册商店控制器失败");
    assert!(logs_contain("controller registered"));
    assert!(router.remove::<Shop>());
    assert!(logs_contain("controller removed"));
}
