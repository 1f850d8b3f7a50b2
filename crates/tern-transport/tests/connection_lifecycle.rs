//! `connection_lifecycle` 集成测试：以内存传输驱动 `Connection` 的接收循环、发送路径与关闭守卫。
//!
//! # 测试目标（Why）
//! - 分帧状态机在分段到达、多帧同达、超大帧三种形态下都必须按序、完整地分派；
//! - 关闭守卫必须在任意并发下只触发一次 `Closed`，且错误语义稳定；
//! - 分派失败的两种处置（丢弃报文 / 关闭连接）不能混淆。
//!
//! # 结构安排（How）
//! - 内存传输的每次写入恰好对应对端的一次读取，测试因此能精确控制分段边界；
//! - 服务端一侧包装为 `Connection`，客户端一侧直接以原始字节读写。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use support::{FATAL, REJECT, RecordingRouter, Received};
use tern_buffer::{BufferError, BufferPool, BufferPoolManager};
use tern_codec::FixedHeaderProtocol;
use tern_core::{codes, config::ConnectionConfig};
use tern_transport::{
    Connection, ConnectionContext, ConnectionError, ConnectionState, ReadOutcome, Transport,
    memory::MemoryTransport,
};

fn serve(router: Arc<RecordingRouter>) -> (Connection, MemoryTransport) {
    serve_with(router, ConnectionConfig::default())
}

fn serve_with(router: Arc<RecordingRouter>, config: ConnectionConfig) -> (Connection, MemoryTransport) {
    let (client, server) = MemoryTransport::pair();
    let context = support::context(router).with_config(config);
    let connection = Connection::new(Box::new(server), &context).expect("构造连接失败");
    (connection, client)
}

/// 帧被拆成 5 + 7 字节两次到达：第一次不产生报文，第二次恰好分派一个报文。
///
/// # 步骤说明（How）
/// 1. 帧为 `[len=12][opcode=1]["AB\0\0"]`；
/// 2. 写入前 5 字节后在短窗口内确认路由器没有收到任何报文；
/// 3. 写入剩余 7 字节后应收到 opcode 1、负载 `AB\0\0` 的报文，且只有这一个。
#[tokio::test(flavor = "multi_thread")]
async fn split_frame_is_buffered_until_complete() {
    let (router, mut rx) = RecordingRouter::new();
    let (connection, client) = serve(router);
    connection.begin_receive().expect("开始接收失败");

    let frame = support::frame(1, b"AB\0\0");
    assert_eq!(frame.len(), 12);
    client.write_all(&frame[..5]).await.expect("写入首段失败");
    support::assert_quiet(&mut rx).await;

    client.write_all(&frame[5..]).await.expect("写入次段失败");
    let received = support::next(&mut rx).await;
    assert_eq!(
        received,
        Received {
            opcode: 1,
            payload: b"AB\0\0".to_vec()
        }
    );
    support::assert_quiet(&mut rx).await;
    assert!(connection.is_open());
}

/// 一次读取里携带三帧与第四帧的前半部分，前三帧按序立即分派，第四帧待补齐后分派。
#[tokio::test(flavor = "multi_thread")]
async fn back_to_back_frames_dispatch_in_order() {
    let (router, mut rx) = RecordingRouter::new();
    let (connection, client) = serve(router);
    connection.begin_receive().expect("开始接收失败");

    let mut burst = Vec::new();
    for opcode in 1..=3 {
        burst.extend_from_slice(&support::frame(opcode, &[opcode as u8; 3]));
    }
    let fourth = support::frame(4, b"tail");
    burst.extend_from_slice(&fourth[..6]);
    client.write_all(&burst).await.expect("写入批量帧失败");

    for opcode in 1..=3 {
        let received = support::next(&mut rx).await;
        assert_eq!(received.opcode, opcode, "报文必须按到达顺序分派");
        assert_eq!(received.payload, vec![opcode as u8; 3]);
    }
    support::assert_quiet(&mut rx).await;

    client.write_all(&fourth[6..]).await.expect("写入剩余字节失败");
    assert_eq!(support::next(&mut rx).await.payload, b"tail".to_vec());
}

/// 接收缓冲只有 4 KiB 时，10 000 字节负载的帧需要换用更大的分段，之后的小帧照常分派；
/// 超大帧处理完毕后接收缓冲换回常规尺寸，大分段归还到池中。
#[tokio::test(flavor = "multi_thread")]
async fn oversized_frame_grows_receive_buffer() {
    let (router, mut rx) = RecordingRouter::new();
    let small = BufferPool::new(4096, 32, true).expect("构造小分段池失败");
    let large = BufferPool::new(64 * 1024, 4, true).expect("构造大分段池失败");
    let buffers = BufferPoolManager::with_pools([small.clone(), large.clone()]);
    let config = ConnectionConfig {
        receive_buffer_size: Some(4096),
        ..ConnectionConfig::default()
    };
    let context = ConnectionContext::new(Arc::new(FixedHeaderProtocol::new()), router, buffers)
        .with_config(config);
    let (client, server) = MemoryTransport::pair();
    let connection = Connection::new(Box::new(server), &context).expect("构造连接失败");
    connection.begin_receive().expect("开始接收失败");
    assert_eq!(small.statistics().in_use, 1);

    let payload: Vec<u8> = (0..10_000u32).map(|value| value as u8).collect();
    let frame = support::frame(9, &payload);
    for chunk in frame.chunks(3000) {
        client.write_all(chunk).await.expect("写入分块失败");
    }
    client
        .write_all(&support::frame(10, b"after"))
        .await
        .expect("写入后续帧失败");

    let first = support::next(&mut rx).await;
    assert_eq!(first.opcode, 9);
    assert_eq!(first.payload, payload);
    let second = support::next(&mut rx).await;
    assert_eq!(second.opcode, 10);
    assert_eq!(second.payload, b"after".to_vec());
    assert!(connection.is_open());

    support::eventually(|| large.statistics().in_use == 0).await;
    assert!(large.statistics().leases >= 1, "超大帧应租借过大分段");
    assert_eq!(small.statistics().in_use, 1, "接收缓冲应换回常规尺寸");
}

/// 十个约 1.5 KiB 的帧以 1000 字节分块流入 4 KiB 接收缓冲：
/// 帧尾跨过缓冲末端时未成帧的字节被搬回偏移 0，所有帧按序分派且不扩容。
#[tokio::test(flavor = "multi_thread")]
async fn straddling_frames_compact_receive_buffer() {
    let (router, mut rx) = RecordingRouter::new();
    let small = BufferPool::new(4096, 32, true).expect("构造小分段池失败");
    let large = BufferPool::new(64 * 1024, 4, true).expect("构造大分段池失败");
    let buffers = BufferPoolManager::with_pools([small, large.clone()]);
    let config = ConnectionConfig {
        receive_buffer_size: Some(4096),
        ..ConnectionConfig::default()
    };
    let context = ConnectionContext::new(Arc::new(FixedHeaderProtocol::new()), router, buffers)
        .with_config(config);
    let (client, server) = MemoryTransport::pair();
    let connection = Connection::new(Box::new(server), &context).expect("构造连接失败");
    connection.begin_receive().expect("开始接收失败");

    let mut stream = Vec::new();
    for opcode in 1..=10u32 {
        stream.extend_from_slice(&support::frame(opcode, &[opcode as u8; 1500]));
    }
    for chunk in stream.chunks(1000) {
        client.write_all(chunk).await.expect("写入分块失败");
    }

    for opcode in 1..=10u32 {
        let received = support::next(&mut rx).await;
        assert_eq!(received.opcode, opcode, "报文必须按到达顺序分派");
        assert_eq!(received.payload, vec![opcode as u8; 1500]);
    }
    support::assert_quiet(&mut rx).await;
    assert!(connection.is_open());
    assert_eq!(large.statistics().leases, 0, "帧小于常规缓冲时不应扩容");
}

#[tokio::test(flavor = "multi_thread")]
async fn begin_receive_only_once() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, _client) = serve(router);
    assert_eq!(connection.state(), ConnectionState::Idle);
    connection.begin_receive().expect("首次开始接收应成功");
    assert!(matches!(
        connection.begin_receive(),
        Err(ConnectionError::AlreadyReceiving)
    ));

    connection.close();
    assert!(matches!(
        connection.begin_receive(),
        Err(ConnectionError::Closed)
    ));
}

/// 16 个任务同时关闭同一连接：只有一个调用返回 `true`，关闭事件只触发一次。
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_fires_once() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, client) = serve(router);
    connection.begin_receive().expect("开始接收失败");

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    connection.on_closed(move |_, error| {
        assert!(error.is_none(), "主动关闭不应携带错误");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let closers: Vec<_> = (0..16)
        .map(|_| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.close() })
        })
        .collect();
    let mut winners = 0;
    for closer in closers {
        winners += usize::from(closer.await.expect("关闭任务异常"));
    }
    connection.closed().await;

    assert_eq!(winners, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(connection.state(), ConnectionState::Closed);

    let mut buf = [0u8; 8];
    assert!(
        matches!(client.read(&mut buf).await, ReadOutcome::Closed),
        "关闭后对端应读到 EOF"
    );
}

/// 对端 EOF 与对端重置都按正常关闭处理，关闭事件不携带错误。
#[tokio::test(flavor = "multi_thread")]
async fn peer_eof_and_reset_close_gracefully() {
    for reset in [false, true] {
        let (router, _rx) = RecordingRouter::new();
        let (connection, client) = serve(router);
        connection.begin_receive().expect("开始接收失败");
        if reset {
            client.inject_reset();
        } else {
            client.shutdown().expect("关闭客户端失败");
        }
        tokio::time::timeout(Duration::from_secs(5), connection.closed())
            .await
            .expect("等待关闭超时");
        assert!(connection.close_error().is_none());
    }
}

/// `Rejected` 只丢弃当前报文；`Fatal` 关闭连接并把错误带入关闭事件。
#[tokio::test(flavor = "multi_thread")]
async fn dispatch_failures_are_scoped() {
    let (router, mut rx) = RecordingRouter::new();
    let (connection, client) = serve(router);
    connection.begin_receive().expect("开始接收失败");

    let mut burst = support::frame(REJECT, b"bad");
    burst.extend_from_slice(&support::frame(5, b"good"));
    client.write_all(&burst).await.expect("写入失败");
    assert_eq!(support::next(&mut rx).await.opcode, 5);
    assert!(connection.is_open(), "被拒绝的报文不应关闭连接");

    let mut burst = support::frame(FATAL, b"boom");
    burst.extend_from_slice(&support::frame(6, b"never"));
    client.write_all(&burst).await.expect("写入失败");
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("等待关闭超时");
    support::assert_quiet(&mut rx).await;

    let error = connection.close_error().expect("致命分派失败应携带错误");
    assert_eq!(error.code(), codes::ROUTER_HANDLER_FAILED);
}

/// 声明长度小于帧头的帧属于协议违例，连接携带 `protocol.invalid_frame_size` 关闭。
#[tokio::test(flavor = "multi_thread")]
async fn invalid_frame_size_closes_connection() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, client) = serve(router);
    connection.begin_receive().expect("开始接收失败");

    let mut header = 4i32.to_le_bytes().to_vec();
    header.extend_from_slice(&1u32.to_le_bytes());
    client.write_all(&header).await.expect("写入失败");
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("等待关闭超时");

    let error = connection.close_error().expect("协议违例应携带错误");
    assert_eq!(error.code(), codes::PROTOCOL_INVALID_FRAME_SIZE);
}

/// `send` 与 `post` 共用出站队列，对端按提交顺序读到完整帧。
#[tokio::test(flavor = "multi_thread")]
async fn send_and_post_preserve_order() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, client) = serve(router);

    connection
        .post(support::packet(1, b"first"))
        .expect("入队失败");
    connection
        .send(support::packet(2, b"second"))
        .await
        .expect("发送失败");

    let mut expected = support::frame(1, b"first");
    expected.extend_from_slice(&support::frame(2, b"second"));
    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    while received.len() < expected.len() {
        match client.read(&mut buf).await {
            ReadOutcome::Data(count) => received.extend_from_slice(&buf[..count]),
            other => panic!("读取意外结束: {other:?}"),
        }
    }
    assert_eq!(received, expected);
}

/// 关闭后发送：`silent_send` 打开时静默成功，关闭时返回 `Closed`。
#[tokio::test(flavor = "multi_thread")]
async fn send_after_close_respects_silent_send() {
    let (router, _rx) = RecordingRouter::new();
    let (silent, _client) = serve(router);
    silent.close();
    silent
        .send(support::packet(1, b"x"))
        .await
        .expect("静默模式下发送不应报错");

    let (router, _rx) = RecordingRouter::new();
    let loud_config = ConnectionConfig {
        silent_send: false,
        ..ConnectionConfig::default()
    };
    let (loud, _client) = serve_with(router, loud_config);
    loud.close();
    assert!(matches!(
        loud.send(support::packet(1, b"x")).await,
        Err(ConnectionError::Closed)
    ));
    assert!(matches!(
        loud.post(support::packet(1, b"x")),
        Err(ConnectionError::Closed)
    ));
}

/// 发送池耗尽：报文无法编码，连接携带 `buffer.exhausted` 关闭；
/// 静默模式下调用方得到 `Ok(())`，非静默模式下得到同一缓冲错误。
#[tokio::test(flavor = "multi_thread")]
async fn exhausted_send_pool_closes_connection() {
    for silent_send in [true, false] {
        let (router, _rx) = RecordingRouter::new();
        let pool = BufferPool::new(64 * 1024, 1, false).expect("构造分段池失败");
        pool.set_max_try_count(0);
        let mut leased = Vec::new();
        while let Ok(segment) = pool.acquire() {
            leased.push(segment);
        }
        assert_eq!(pool.available_segment_count(), 0);

        let config = ConnectionConfig {
            silent_send,
            ..ConnectionConfig::default()
        };
        let context = ConnectionContext::new(
            Arc::new(FixedHeaderProtocol::new()),
            router,
            BufferPoolManager::with_pools([pool.clone()]),
        )
        .with_config(config);
        let (_client, server) = MemoryTransport::pair();
        let connection = Connection::new(Box::new(server), &context).expect("构造连接失败");

        let outcome = connection.send(support::packet(1, b"dropped")).await;
        if silent_send {
            assert!(outcome.is_ok(), "静默模式下发送不应报错: {outcome:?}");
        } else {
            assert!(
                matches!(
                    outcome,
                    Err(ConnectionError::Buffer(BufferError::Exhausted { .. }))
                ),
                "应返回缓冲耗尽错误: {outcome:?}"
            );
        }

        assert!(!connection.is_open(), "发送失败后连接不应保持打开");
        connection.closed().await;
        let error = connection.close_error().expect("发送失败应携带错误关闭");
        assert_eq!(error.code(), codes::BUFFER_EXHAUSTED);
        drop(leased);
    }
}

/// 对端消失后写出失败：连接携带传输错误关闭，非静默模式下调用方收到同一错误码。
#[tokio::test(flavor = "multi_thread")]
async fn write_failure_closes_connection() {
    let (router, _rx) = RecordingRouter::new();
    let config = ConnectionConfig {
        silent_send: false,
        ..ConnectionConfig::default()
    };
    let (connection, client) = serve_with(router, config);
    drop(client);

    let outcome = connection.send(support::packet(1, b"lost")).await;
    match outcome {
        Err(ConnectionError::Transport(error)) => assert_eq!(error.code(), codes::TRANSPORT_IO),
        other => panic!("应返回传输错误: {other:?}"),
    }
    connection.closed().await;
    let error = connection.close_error().expect("写出失败应携带错误");
    assert_eq!(error.code(), codes::TRANSPORT_IO);
}

/// `closed()` 返回时关闭观察者已运行完毕，且观察者按逆订阅序执行。
#[tokio::test(flavor = "multi_thread")]
async fn closed_future_resolves_after_observers() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, _client) = serve(router);

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for label in ["first", "second"] {
        let order = Arc::clone(&order);
        connection.on_closed(move |_, _| order.lock().push(label));
    }
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    connection.on_closed(move |_, _| flag.store(true, Ordering::SeqCst));

    let waiter = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.closed().await })
    };
    connection.close();
    waiter.await.expect("等待任务异常");

    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(*order.lock(), vec!["second", "first"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn display_uses_transport_name_and_id() {
    let (router, _rx) = RecordingRouter::new();
    let (connection, _client) = serve(router);
    assert_eq!(
        connection.to_string(),
        format!("Memory({})", connection.id())
    );
    assert!(connection.id().to_string().starts_with('#'));
}

#[test]
fn new_requires_runtime() {
    let (router, _rx) = RecordingRouter::new();
    let (_client, server) = MemoryTransport::pair();
    let context = support::context(router);
    assert!(matches!(
        Connection::new(Box::new(server), &context),
        Err(ConnectionError::RuntimeUnavailable)
    ));
}
