use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tern_codec::{InboundPacket, Opcode};
use tern_core::{
    CoreError, ErrorCategory, codes,
    config::{RouterConfig, UnknownOpcodePolicy},
};
use tern_transport::{DispatchError, PacketRouter, Session};
use tracing::{debug, info, trace};

use crate::{
    RouterError,
    controller::{Controller, HandlerEntry, HandlerSet},
};

#[derive(Clone)]
struct RegisteredController {
    type_id: TypeId,
    name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
    handlers: Vec<Arc<HandlerEntry>>,
}

/// 路由表快照：注册与移除时整体替换，分派路径只读。
#[derive(Clone, Default)]
struct RouteTable {
    controllers: Vec<RegisteredController>,
    handlers: HashMap<Opcode, Arc<HandlerEntry>>,
}

impl RouteTable {
    fn find(&self, type_id: TypeId) -> Option<&RegisteredController> {
        self.controllers
            .iter()
            .find(|controller| controller.type_id == type_id)
    }
}

/// 以操作码为键的报文路由器。
///
/// # 设计动机（Why）
/// - 连接的接收任务对每个报文同步调用 [`PacketRouter::handle`]，查表必须无锁；
///   注册与移除发生在启动或运维阶段，频率极低。
///
/// # 实现策略（How）
/// - 路由表以 [`ArcSwap`] 保存不可变快照，分派路径 `load` 后只读访问；
/// - 变更在写者互斥锁内克隆当前快照、修改副本、整体 `store`，
///   并发的分派要么看到旧表要么看到新表，不会看到半注册状态；
/// - 移除控制器后按剩余控制器的注册顺序完整重建操作码表。
///
/// # 契约说明（What）
/// - `register`：同类型控制器重复注册返回 `DuplicateController`；任一操作码冲突返回
///   `DuplicateOpcode`，此时路由表保持原样；
/// - `handle`：缺少操作码为致命错误；未知操作码按 [`UnknownOpcodePolicy`] 处置；
///   校验失败以 `Rejected` 丢弃该报文；处理函数返回错误以 `Fatal` 关闭连接。
pub struct OpcodePacketRouter {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    unknown_opcode: UnknownOpcodePolicy,
}

impl Default for OpcodePacketRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodePacketRouter {
    /// 未知操作码视为致命错误的路由器。
    pub fn new() -> Self {
        Self::with_policy(UnknownOpcodePolicy::default())
    }

    /// 以指定的未知操作码策略构造空路由器。
    pub fn with_policy(unknown_opcode: UnknownOpcodePolicy) -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            writer: Mutex::new(()),
            unknown_opcode,
        }
    }

    /// 按配置节构造。
    ///
    /// ```
    /// use tern_core::config::{RouterConfig, UnknownOpcodePolicy};
    /// use tern_router::OpcodePacketRouter;
    ///
    /// let router = OpcodePacketRouter::from_config(&RouterConfig {
    ///     unknown_opcode: UnknownOpcodePolicy::LogAndDrop,
    /// });
    /// assert_eq!(router.unknown_opcode_policy(), UnknownOpcodePolicy::LogAndDrop);
    /// assert_eq!(router.controller_count(), 0);
    /// ```
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::with_policy(config.unknown_opcode)
    }

    /// 当前的未知操作码策略。
    pub fn unknown_opcode_policy(&self) -> UnknownOpcodePolicy {
        self.unknown_opcode
    }

    /// 注册控制器实例。
    pub fn register<C: Controller>(&self, controller: C) -> Result<(), RouterError> {
        self.register_shared(Arc::new(controller))
    }

    /// 注册已共享的控制器实例，调用方可保留 `Arc` 继续访问其状态。
    pub fn register_shared<C: Controller>(&self, controller: Arc<C>) -> Result<(), RouterError> {
        let name = type_name::<C>();
        let _guard = self.writer.lock();
        let current = self.table.load_full();
        if current.find(TypeId::of::<C>()).is_some() {
            return Err(RouterError::DuplicateController { controller: name });
        }

        let mut declared = HandlerSet::new();
        controller.register_handlers(&mut declared);
        let entries = declared.build(&controller, name);

        let mut next = RouteTable::clone(&current);
        for entry in &entries {
            if next.handlers.insert(entry.opcode, Arc::clone(entry)).is_some() {
                return Err(RouterError::DuplicateOpcode {
                    controller: name,
                    opcode: entry.opcode,
                });
            }
        }
        next.controllers.push(RegisteredController {
            type_id: TypeId::of::<C>(),
            name,
            instance: controller,
            handlers: entries,
        });
        let handlers = next.handlers.len();
        self.table.store(Arc::new(next));
        info!(controller = name, handlers, "controller registered");
        Ok(())
    }

    /// 移除控制器并重建操作码表；未注册时返回 `false`。
    pub fn remove<C: Controller>(&self) -> bool {
        let _guard = self.writer.lock();
        let current = self.table.load_full();
        let type_id = TypeId::of::<C>();
        if current.find(type_id).is_none() {
            return false;
        }

        let controllers: Vec<_> = current
            .controllers
            .iter()
            .filter(|controller| controller.type_id != type_id)
            .cloned()
            .collect();
        let mut handlers = HashMap::new();
        for controller in &controllers {
            for entry in &controller.handlers {
                handlers.insert(entry.opcode, Arc::clone(entry));
            }
        }
        self.table.store(Arc::new(RouteTable {
            controllers,
            handlers,
        }));
        info!(controller = type_name::<C>(), "controller removed");
        true
    }

    /// 取回已注册的控制器实例；未注册时返回 `ControllerNotFound`。
    pub fn get<C: Controller>(&self) -> Result<Arc<C>, RouterError> {
        self.try_get::<C>()
            .ok_or_else(|| RouterError::ControllerNotFound {
                controller: type_name::<C>(),
            })
    }

    /// 取回已注册的控制器实例；未注册时为 `None`。
    pub fn try_get<C: Controller>(&self) -> Option<Arc<C>> {
        let table = self.table.load();
        let instance = Arc::clone(&table.find(TypeId::of::<C>())?.instance);
        instance.downcast::<C>().ok()
    }

    /// 已注册的控制器数量。
    pub fn controller_count(&self) -> usize {
        self.table.load().controllers.len()
    }

    /// 操作码表中的处理函数数量。
    pub fn handler_count(&self) -> usize {
        self.table.load().handlers.len()
    }

    /// 操作码是否已有处理函数。
    pub fn contains_opcode(&self, opcode: impl Into<Opcode>) -> bool {
        self.table.load().handlers.contains_key(&opcode.into())
    }

    fn unknown(&self, opcode: Opcode) -> Result<(), DispatchError> {
        let error = CoreError::from(RouterError::UnknownOpcode { opcode });
        match self.unknown_opcode {
            UnknownOpcodePolicy::Fail => Err(DispatchError::Fatal(error)),
            UnknownOpcodePolicy::Ignore => {
                trace!(%opcode, "unknown opcode ignored");
                Ok(())
            }
            UnknownOpcodePolicy::LogAndDrop => Err(DispatchError::Rejected(error)),
        }
    }
}

impl PacketRouter for OpcodePacketRouter {
    fn handle(&self, session: &dyn Session, packet: InboundPacket<'_>) -> Result<(), DispatchError> {
        let Some(opcode) = packet.opcode() else {
            return Err(DispatchError::Fatal(RouterError::MissingOpcode.into()));
        };
        // 处理函数可能运行较久，只持有条目本身，不占用快照守卫。
        let Some(entry) = self.table.load().handlers.get(&opcode).cloned() else {
            return self.unknown(opcode);
        };

        for validator in &entry.validators {
            if let Err(rejected) = validator.validate(session, &packet) {
                debug!(%opcode, reason = rejected.reason(), "packet failed validation");
                return Err(DispatchError::Rejected(
                    RouterError::ValidationFailed {
                        opcode,
                        reason: rejected.into_reason(),
                    }
                    .into(),
                ));
            }
        }

        trace!(%opcode, controller = entry.controller, "dispatching packet");
        entry.invoke(session, packet).map_err(|error| {
            DispatchError::Fatal(
                CoreError::new(
                    codes::ROUTER_HANDLER_FAILED,
                    format!("handler for {opcode} in {} failed", entry.controller),
                )
                .with_category(ErrorCategory::NonRetryable)
                .with_cause(error),
            )
        })
    }
}

impl fmt::Debug for OpcodePacketRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.load();
        let controllers: Vec<_> = table
            .controllers
            .iter()
            .map(|controller| controller.name)
            .collect();
        f.debug_struct("OpcodePacketRouter")
            .field("controllers", &controllers)
            .field("handlers", &table.handlers.len())
            .field("unknown_opcode", &self.unknown_opcode)
            .finish()
    }
}
