use std::{fmt, sync::Arc};

use tern_codec::{InboundPacket, Opcode};
use tern_core::CoreError;
use tern_transport::Session;

use crate::ValidationError;

/// 一组按操作码声明的处理函数及其共享状态。
///
/// # 设计动机（Why）
/// - 控制器是业务层与路由器的唯一接触面：实例保存业务状态，
///   [`Controller::register_handlers`] 显式列出 `(操作码, 处理函数)`，
///   路由器无需反射即可建立操作码表。
///
/// # 契约说明（What）
/// - 同一控制器类型在一个路由器内至多注册一次，类型即身份；
/// - `register_handlers` 在注册与重建时都可能被调用，实现应是纯声明式的，不应有副作用；
/// - 处理函数在连接的接收任务内同步执行，返回错误会使连接关闭。
///
/// # 示例
/// ```
/// use tern_codec::{InboundPacket, Opcode};
/// use tern_core::CoreError;
/// use tern_router::{Controller, HandlerSet};
/// use tern_transport::Session;
///
/// struct Ping;
///
/// impl Ping {
///     fn ping(&self, _session: &dyn Session, _packet: InboundPacket<'_>) -> Result<(), CoreError> {
///         Ok(())
///     }
/// }
///
/// impl Controller for Ping {
///     fn register_handlers(&self, handlers: &mut HandlerSet<Self>) {
///         handlers.on(Opcode(1), Self::ping);
///     }
/// }
/// ```
pub trait Controller: Send + Sync + 'static {
    /// 向 `handlers` 声明本控制器的处理函数与校验器。
    fn register_handlers(&self, handlers: &mut HandlerSet<Self>)
    where
        Self: Sized;
}

/// 在处理函数执行前检查报文。
///
/// 返回 `Err` 时路由器丢弃该报文并报告 `ValidationFailed`，连接保持打开。
pub trait PacketValidator: Send + Sync + 'static {
    fn validate(&self, session: &dyn Session, packet: &InboundPacket<'_>)
    -> Result<(), ValidationError>;
}

impl<F> PacketValidator for F
where
    F: Fn(&dyn Session, &InboundPacket<'_>) -> Result<(), ValidationError> + Send + Sync + 'static,
{
    fn validate(
        &self,
        session: &dyn Session,
        packet: &InboundPacket<'_>,
    ) -> Result<(), ValidationError> {
        self(session, packet)
    }
}

type HandlerFn<C> =
    dyn Fn(&C, &dyn Session, InboundPacket<'_>) -> Result<(), CoreError> + Send + Sync;

type InvokeFn = dyn Fn(&dyn Session, InboundPacket<'_>) -> Result<(), CoreError> + Send + Sync;

struct HandlerSpec<C> {
    opcode: Opcode,
    tags: Vec<&'static str>,
    validators: Vec<Arc<dyn PacketValidator>>,
    handler: Arc<HandlerFn<C>>,
}

/// 控制器声明处理函数的构建器。
///
/// # 契约说明（What）
/// - [`on`](Self::on) 登记一个处理函数，返回的 [`HandlerBuilder`] 可继续附加标签与专属校验器；
/// - [`validate_tagged`](Self::validate_tagged) 把校验器挂到所有带该标签的处理函数上，
///   与声明先后无关；
/// - [`validate_all`](Self::validate_all) 把校验器挂到本控制器的全部处理函数上；
/// - 校验顺序：处理函数专属校验器在前，随后是控制器级校验器，各自按声明顺序。
pub struct HandlerSet<C> {
    handlers: Vec<HandlerSpec<C>>,
    controller_validators: Vec<(Option<&'static str>, Arc<dyn PacketValidator>)>,
}

impl<C> Default for HandlerSet<C> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            controller_validators: Vec::new(),
        }
    }
}

impl<C: Send + Sync + 'static> HandlerSet<C> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 登记 `opcode` 的处理函数。
    pub fn on<F>(&mut self, opcode: impl Into<Opcode>, handler: F) -> HandlerBuilder<'_, C>
    where
        F: Fn(&C, &dyn Session, InboundPacket<'_>) -> Result<(), CoreError>
            + Send
            + Sync
            + 'static,
    {
        let index = self.handlers.len();
        self.handlers.push(HandlerSpec {
            opcode: opcode.into(),
            tags: Vec::new(),
            validators: Vec::new(),
            handler: Arc::new(handler),
        });
        HandlerBuilder {
            spec: &mut self.handlers[index],
        }
    }

    /// 为带 `tag` 的处理函数追加校验器。
    pub fn validate_tagged(
        &mut self,
        tag: &'static str,
        validator: impl PacketValidator,
    ) -> &mut Self {
        self.controller_validators
            .push((Some(tag), Arc::new(validator)));
        self
    }

    /// 为全部处理函数追加校验器。
    pub fn validate_all(&mut self, validator: impl PacketValidator) -> &mut Self {
        self.controller_validators.push((None, Arc::new(validator)));
        self
    }

    /// 已登记的处理函数数量。
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 绑定控制器实例，生成路由表条目。
    pub(crate) fn build(self, controller: &Arc<C>, name: &'static str) -> Vec<Arc<HandlerEntry>> {
        let HandlerSet {
            handlers,
            controller_validators,
        } = self;
        handlers
            .into_iter()
            .map(|spec| {
                let mut validators = spec.validators;
                validators.extend(
                    controller_validators
                        .iter()
                        .filter(|(tag, _)| tag.is_none_or(|tag| spec.tags.contains(&tag)))
                        .map(|(_, validator)| Arc::clone(validator)),
                );
                let instance = Arc::clone(controller);
                let handler = spec.handler;
                let invoke: Box<InvokeFn> =
                    Box::new(move |session: &dyn Session, packet: InboundPacket<'_>| {
                        handler(&*instance, session, packet)
                    });
                Arc::new(HandlerEntry {
                    opcode: spec.opcode,
                    controller: name,
                    tags: spec.tags,
                    validators,
                    invoke,
                })
            })
            .collect()
    }
}

/// [`HandlerSet::on`] 返回的单个处理函数配置器。
pub struct HandlerBuilder<'a, C> {
    spec: &'a mut HandlerSpec<C>,
}

impl<C> HandlerBuilder<'_, C> {
    /// 附加标签，供 [`HandlerSet::validate_tagged`] 匹配。
    pub fn tag(self, tag: &'static str) -> Self {
        if !self.spec.tags.contains(&tag) {
            self.spec.tags.push(tag);
        }
        self
    }

    /// 追加仅作用于该处理函数的校验器。
    pub fn validator(self, validator: impl PacketValidator) -> Self {
        self.spec.validators.push(Arc::new(validator));
        self
    }
}

/// 路由表中的一个处理函数：已绑定控制器实例与完整校验链。
pub(crate) struct HandlerEntry {
    pub(crate) opcode: Opcode,
    pub(crate) controller: &'static str,
    pub(crate) tags: Vec<&'static str>,
    pub(crate) validators: Vec<Arc<dyn PacketValidator>>,
    invoke: Box<InvokeFn>,
}

impl HandlerEntry {
    pub(crate) fn invoke(
        &self,
        session: &dyn Session,
        packet: InboundPacket<'_>,
    ) -> Result<(), CoreError> {
        (self.invoke)(session, packet)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("opcode", &self.opcode)
            .field("controller", &self.controller)
            .field("tags", &self.tags)
            .field("validators", &self.validators.len())
            .finish()
    }
}
