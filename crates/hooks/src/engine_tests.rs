use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waygate_context::{HookAction, InboundQuery, QueryContext};
use waygate_dns::{DnsRecord, DomainName, RecordType, ResponseCode, Transport};
use waygate_sidequery::SideQueryTransport;

use super::*;
use crate::module::{OutQueryContext, PolicyModule, TagQuery};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn query(name: &str) -> InboundQuery {
    InboundQuery::new(
        DomainName::from_ascii(name).unwrap(),
        RecordType::A,
        Transport::Udp,
        addr("203.0.113.5:53000"),
        addr("192.0.2.1:53"),
    )
}

fn ctx(name: &str) -> QueryContext {
    QueryContext::new(query(name), 0, None, CancellationToken::new())
}

fn engine(module: PolicyModule, transport: Arc<dyn SideQueryTransport>) -> HookEngine {
    HookEngine::new(Arc::new(module), transport, EngineConfig::default())
}

/// Answers every side query with its own payload.
#[derive(Default)]
struct EchoTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl SideQueryTransport for EchoTransport {
    async fn exchange(
        &self,
        _dest: SocketAddr,
        payload: Bytes,
        _deadline: Instant,
    ) -> anyhow::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }
}

/// Fails every exchange.
#[derive(Default)]
struct FailTransport;

#[async_trait]
impl SideQueryTransport for FailTransport {
    async fn exchange(
        &self,
        _dest: SocketAddr,
        _payload: Bytes,
        _deadline: Instant,
    ) -> anyhow::Result<Bytes> {
        anyhow::bail!("transport down")
    }
}

/// Never completes, for abandonment tests.
struct HangTransport;

#[async_trait]
impl SideQueryTransport for HangTransport {
    async fn exchange(
        &self,
        _dest: SocketAddr,
        _payload: Bytes,
        _deadline: Instant,
    ) -> anyhow::Result<Bytes> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_unregistered_point_is_a_noop() {
    let engine = engine(
        PolicyModule::builder("empty").build(),
        Arc::new(EchoTransport::default()),
    );
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert!(ctx.records().is_empty());
    assert_eq!(ctx.rcode(), ResponseCode::NoError);
}

#[tokio::test]
async fn test_handled_point_reports_answered() {
    let module = PolicyModule::builder("m")
        .preresolve(|ctx: &mut QueryContext| {
            ctx.add_answer(RecordType::A, "198.51.100.7", None, None)?;
            Ok(HookAction::Answered)
        })
        .build();
    let engine = engine(module, Arc::new(EchoTransport::default()));
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Answered);
    assert_eq!(ctx.records().len(), 1);
}

#[tokio::test]
async fn test_hook_error_fails_open() {
    init_tracing();
    let module = PolicyModule::builder("m")
        .preresolve(|_: &mut QueryContext| anyhow::bail!("script blew up"))
        .build();
    let engine = engine(module, Arc::new(EchoTransport::default()));
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert!(ctx.records().is_empty());
}

#[tokio::test]
async fn test_postresolve_error_keeps_computed_answer() {
    let module = PolicyModule::builder("m")
        .postresolve(|_: &mut QueryContext| anyhow::bail!("late failure"))
        .build();
    let engine = engine(module, Arc::new(EchoTransport::default()));
    let mut ctx = ctx("example.com");
    ctx.add_answer(RecordType::A, "198.51.100.9", None, None).unwrap();
    ctx.set_rcode(ResponseCode::NoError);

    assert_eq!(engine.postresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert_eq!(ctx.records().len(), 1);
    assert_eq!(ctx.rcode(), ResponseCode::NoError);
}

#[tokio::test]
async fn test_continuation_resumes_exactly_once_with_answer() {
    let resumed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Bytes::new()));

    let hook_resumed = resumed.clone();
    let hook_seen = seen.clone();
    let module = PolicyModule::builder("m")
        .preresolve(move |ctx: &mut QueryContext| {
            let resumed = hook_resumed.clone();
            let seen = hook_seen.clone();
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from_static(b"\x00\x2aside-query"),
                Box::new(move |ctx: &mut QueryContext| {
                    resumed.fetch_add(1, Ordering::SeqCst);
                    *seen.lock().unwrap() = ctx.side_answer().cloned().unwrap_or_default();
                    ctx.add_answer(RecordType::A, "203.0.113.99", None, None)?;
                    Ok(HookAction::Answered)
                }),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let transport = Arc::new(EchoTransport::default());
    let engine = engine(module, transport.clone());
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Answered);
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(&seen.lock().unwrap()[..], b"\x00\x2aside-query");
    assert_eq!(ctx.records().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_delivers_empty_sentinel() {
    init_tracing();
    let seen = Arc::new(Mutex::new(None::<Bytes>));

    let hook_seen = seen.clone();
    let module = PolicyModule::builder("m")
        .preresolve(move |ctx: &mut QueryContext| {
            let seen = hook_seen.clone();
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from_static(b"\x00\x01qq"),
                Box::new(move |ctx: &mut QueryContext| {
                    *seen.lock().unwrap() = ctx.side_answer().cloned();
                    Ok(HookAction::Continue)
                }),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let engine = engine(module, Arc::new(FailTransport));
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert_eq!(seen.lock().unwrap().as_deref(), Some(&[][..]));
}

#[tokio::test]
async fn test_chained_continuations_run_in_order() {
    let module = PolicyModule::builder("m")
        .preresolve(move |ctx: &mut QueryContext| {
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from_static(b"\x00\x01first"),
                Box::new(move |ctx: &mut QueryContext| {
                    ctx.submit_side_query(
                        addr("198.51.100.53:53"),
                        Bytes::from_static(b"\x00\x02second"),
                        Box::new(|ctx: &mut QueryContext| {
                            ctx.set_rcode(ResponseCode::NxDomain);
                            Ok(HookAction::Answered)
                        }),
                    )?;
                    Ok(HookAction::Continue)
                }),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let transport = Arc::new(EchoTransport::default());
    let engine = engine(module, transport.clone());
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Answered);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.rcode(), ResponseCode::NxDomain);
}

#[tokio::test]
async fn test_postresolve_cannot_suspend() {
    init_tracing();
    let module = PolicyModule::builder("m")
        .postresolve(|ctx: &mut QueryContext| {
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from_static(b"\x00\x01late"),
                Box::new(|_: &mut QueryContext| Ok(HookAction::Answered)),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let transport = Arc::new(EchoTransport::default());
    let engine = engine(module, transport.clone());
    let mut ctx = ctx("example.com");

    assert_eq!(engine.postresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_abandoned_query_never_resumes() {
    let resumed = Arc::new(AtomicUsize::new(0));

    let hook_resumed = resumed.clone();
    let module = PolicyModule::builder("m")
        .preresolve(move |ctx: &mut QueryContext| {
            let resumed = hook_resumed.clone();
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from_static(b"\x00\x01hang"),
                Box::new(move |_: &mut QueryContext| {
                    resumed.fetch_add(1, Ordering::SeqCst);
                    Ok(HookAction::Answered)
                }),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let engine = engine(module, Arc::new(HangTransport));
    let cancel = CancellationToken::new();
    let mut ctx = QueryContext::new(query("example.com"), 0, None, cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Abandoned);
    assert_eq!(resumed.load(Ordering::SeqCst), 0);
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_oversized_side_payload_gets_sentinel() {
    let seen = Arc::new(Mutex::new(None::<Bytes>));

    let hook_seen = seen.clone();
    let module = PolicyModule::builder("m")
        .preresolve(move |ctx: &mut QueryContext| {
            let seen = hook_seen.clone();
            ctx.submit_side_query(
                addr("198.51.100.53:53"),
                Bytes::from(vec![0u8; 64]),
                Box::new(move |ctx: &mut QueryContext| {
                    *seen.lock().unwrap() = ctx.side_answer().cloned();
                    Ok(HookAction::Continue)
                }),
            )?;
            Ok(HookAction::Continue)
        })
        .build();

    let transport = Arc::new(EchoTransport::default());
    let config = EngineConfig {
        max_side_payload: 16,
        ..Default::default()
    };
    let engine = HookEngine::new(Arc::new(module), transport.clone(), config);
    let mut ctx = ctx("example.com");

    assert_eq!(engine.preresolve(&mut ctx).await, DispatchOutcome::Continue);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_eq!(seen.lock().unwrap().as_deref(), Some(&[][..]));
}

#[test]
fn test_ipfilter_dispositions() {
    let allow_all = engine(
        PolicyModule::builder("none").build(),
        Arc::new(FailTransport),
    );
    let header = Default::default();
    assert!(allow_all.ipfilter(addr("10.0.0.1:1"), addr("192.0.2.1:53"), &header));

    let reject = engine(
        PolicyModule::builder("m")
            .ipfilter(
                |remote: SocketAddr, _local: SocketAddr, _h: &waygate_dns::HeaderSnapshot| {
                    Ok(remote.ip() != "10.0.0.1".parse::<std::net::IpAddr>().unwrap())
                },
            )
            .build(),
        Arc::new(FailTransport),
    );
    assert!(!reject.ipfilter(addr("10.0.0.1:1"), addr("192.0.2.1:53"), &header));
    assert!(reject.ipfilter(addr("10.0.0.2:1"), addr("192.0.2.1:53"), &header));

    let broken = engine(
        PolicyModule::builder("m")
            .ipfilter(
                |_r: SocketAddr, _l: SocketAddr, _h: &waygate_dns::HeaderSnapshot| {
                    anyhow::bail!("nope")
                },
            )
            .build(),
        Arc::new(FailTransport),
    );
    assert!(broken.ipfilter(addr("10.0.0.1:1"), addr("192.0.2.1:53"), &header));
}

#[test]
fn test_classifier_failure_uses_default_tag() {
    let engine = engine(
        PolicyModule::builder("m")
            .gettag(|_: &TagQuery| anyhow::bail!("classifier broke"))
            .build(),
        Arc::new(FailTransport),
    );
    let decision = engine.classify(&TagQuery {
        remote: addr("203.0.113.5:5000"),
        local: addr("192.0.2.1:53"),
        subnet: None,
        qname: DomainName::from_ascii("example.com").unwrap(),
        qtype: RecordType::A,
    });
    assert_eq!(decision, TagDecision::default());
    assert_eq!(decision.tag, 0);
}

#[test]
fn test_preoutquery_short_circuit() {
    let engine = engine(
        PolicyModule::builder("m")
            .preoutquery(|out: &mut OutQueryContext| {
                out.records.push(
                    DnsRecord::answer(out.qname.clone(), RecordType::A, 60, "203.0.113.8")
                        .unwrap(),
                );
                Ok(HookAction::Answered)
            })
            .build(),
        Arc::new(FailTransport),
    );

    let mut out = OutQueryContext::new(
        addr("198.51.100.10:53"),
        addr("203.0.113.5:5000"),
        DomainName::from_ascii("ns.example.com").unwrap(),
        RecordType::A,
        Transport::Udp,
    );
    assert!(engine.preoutquery(&mut out));
    assert_eq!(out.records.len(), 1);
}

#[test]
fn test_postoutquery_observes_without_short_circuit() {
    let engine = engine(
        PolicyModule::builder("m")
            .postoutquery(|out: &mut OutQueryContext| {
                for record in &mut out.records {
                    record.ttl = record.ttl.min(300);
                }
                Ok(HookAction::Answered) // ignored: postoutquery never short-circuits
            })
            .build(),
        Arc::new(FailTransport),
    );

    let records = vec![
        DnsRecord::answer(
            DomainName::from_ascii("example.com").unwrap(),
            RecordType::A,
            86400,
            "198.51.100.4",
        )
        .unwrap(),
    ];
    let mut out = OutQueryContext::new(
        addr("198.51.100.10:53"),
        addr("203.0.113.5:5000"),
        DomainName::from_ascii("example.com").unwrap(),
        RecordType::A,
        Transport::Udp,
    )
    .with_records(records);

    engine.postoutquery(&mut out);
    assert_eq!(out.records[0].ttl, 300);
}
