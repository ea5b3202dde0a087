//! Connection behaviour against an in-memory driver.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libattacher::classify::DEFAULT_FINAL_CODES;
use libattacher::*;
use tokio::time::Instant;

const VOLUME: &str = "myname";
const NODE: &str = "MyNodeID";

fn connect(transport: MemoryTransport) -> Connection<MemoryTransport> {
    common::init_logger();
    Connection::with_transport(transport, Duration::from_secs(10), FinalCodes::default())
}

fn default_capability() -> VolumeCapability {
    VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)
}

fn publish_info() -> PublishInfo {
    HashMap::from([
        ("first".to_owned(), "foo".to_owned()),
        ("second".to_owned(), "bar".to_owned()),
        ("third".to_owned(), "baz".to_owned()),
    ])
}

async fn attach(
    conn: &Connection<MemoryTransport>,
    read_only: bool,
) -> Result<Option<PublishInfo>, VolumeOpError> {
    conn.attach(None, &VolumeId::from(VOLUME), read_only, NODE, &default_capability())
        .await
}

async fn detach(conn: &Connection<MemoryTransport>) -> Result<(), VolumeOpError> {
    conn.detach(None, &VolumeId::from(VOLUME), NODE).await
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_driver_name() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_response(CsiMessage::PluginInfo(GetPluginInfoResponse {
        name: "csi/example".into(),
        vendor_version: "0.1.0".into(),
        manifest: HashMap::from([("hello".to_owned(), "world".to_owned())]),
    }));

    let name = conn.get_driver_name(None).await.unwrap();
    assert_eq!(name, "csi/example");
    assert_eq!(
        conn.transport().requests(),
        vec![CsiMessage::GetPluginInfo(GetPluginInfoRequest {
            version: CSI_VERSION
        })]
    );
}

#[tokio::test]
async fn get_driver_name_remote_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::internal("mock error"));

    let err = conn.get_driver_name(None).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.status().map(Status::message), Some("mock error"));
}

#[tokio::test]
async fn get_driver_name_empty() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_response(CsiMessage::PluginInfo(GetPluginInfoResponse::default()));

    let err = conn.get_driver_name(None).await.unwrap_err();
    assert_eq!(err, CsiError::EmptyDriverName);
}

#[tokio::test]
async fn probe() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_response(CsiMessage::ProbeResult(ProbeResponse {}));
    conn.transport().push_error(Status::unavailable("not ready"));

    conn.probe(None).await.unwrap();
    let err = conn.probe(None).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[tokio::test]
async fn supports_controller_publish() {
    let cases = [
        (
            "success",
            vec![
                ControllerServiceCapability::rpc(ControllerRpc::CreateDeleteVolume),
                ControllerServiceCapability::rpc(ControllerRpc::PublishUnpublishVolume),
            ],
            true,
        ),
        (
            "no publish",
            vec![ControllerServiceCapability::rpc(
                ControllerRpc::CreateDeleteVolume,
            )],
            false,
        ),
        (
            "empty capability",
            vec![ControllerServiceCapability { kind: None }],
            false,
        ),
        ("no capabilities", vec![], false),
        (
            "untyped entry before publish",
            vec![
                ControllerServiceCapability { kind: None },
                ControllerServiceCapability::rpc(ControllerRpc::PublishUnpublishVolume),
            ],
            true,
        ),
    ];

    for (name, capabilities, expected) in cases {
        let conn = connect(MemoryTransport::new());
        conn.transport().push_response(CsiMessage::ControllerCapabilities(
            ControllerGetCapabilitiesResponse { capabilities },
        ));

        let supported = conn
            .supports_controller_publish(None)
            .await
            .unwrap_or_else(|e| panic!("test {name:?}: got error: {e}"));
        assert_eq!(supported, expected, "test {name:?}");
        assert_eq!(
            conn.transport().requests(),
            vec![CsiMessage::ControllerGetCapabilities(
                ControllerGetCapabilitiesRequest {
                    version: CSI_VERSION
                }
            )]
        );
    }
}

#[tokio::test]
async fn supports_controller_publish_remote_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::unknown("mock error"));

    let err = conn.supports_controller_publish(None).await.unwrap_err();
    assert_eq!(err.code(), Code::Unknown);
}

// ---------------------------------------------------------------------------
// Attach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attach_success() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_response(CsiMessage::VolumePublished(ControllerPublishVolumeResponse {
        publish_volume_info: Some(publish_info()),
    }));

    let info = attach(&conn, false).await.unwrap();
    assert_eq!(info, Some(publish_info()));
    assert_eq!(
        conn.transport().requests(),
        vec![CsiMessage::ControllerPublishVolume(
            ControllerPublishVolumeRequest {
                version: CSI_VERSION,
                volume_id: VOLUME.into(),
                node_id: NODE.into(),
                volume_capability: default_capability(),
                readonly: false,
            }
        )]
    );
}

#[tokio::test]
async fn attach_success_no_info() {
    for response in [
        ControllerPublishVolumeResponse::default(),
        ControllerPublishVolumeResponse {
            publish_volume_info: Some(HashMap::new()),
        },
    ] {
        let conn = connect(MemoryTransport::new());
        conn.transport().push_response(CsiMessage::VolumePublished(response));

        assert_eq!(attach(&conn, false).await.unwrap(), None);
    }
}

#[tokio::test]
async fn attach_readonly() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_response(CsiMessage::VolumePublished(ControllerPublishVolumeResponse {
        publish_volume_info: Some(publish_info()),
    }));

    assert_eq!(attach(&conn, true).await.unwrap(), Some(publish_info()));
    match conn.transport().requests().as_slice() {
        [CsiMessage::ControllerPublishVolume(req)] => assert!(req.readonly),
        other => panic!("unexpected requests: {other:?}"),
    }
}

#[tokio::test]
async fn attach_final_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::not_found("Injecting error 5"));

    let err = attach(&conn, false).await.unwrap_err();
    assert!(err.detached());
    assert_eq!(err.error().code(), Code::NotFound);
}

#[tokio::test]
async fn attach_transient_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::deadline_exceeded("Injecting error 4"));

    let err = attach(&conn, false).await.unwrap_err();
    assert!(!err.detached());
    assert_eq!(err.error().code(), Code::DeadlineExceeded);
}

// ---------------------------------------------------------------------------
// Detach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detach_success() {
    let conn = connect(MemoryTransport::new());
    conn.transport()
        .push_response(CsiMessage::VolumeUnpublished(ControllerUnpublishVolumeResponse {}));

    detach(&conn).await.unwrap();
    assert_eq!(
        conn.transport().requests(),
        vec![CsiMessage::ControllerUnpublishVolume(
            ControllerUnpublishVolumeRequest {
                version: CSI_VERSION,
                volume_id: VOLUME.into(),
                node_id: NODE.into(),
            }
        )]
    );
}

#[tokio::test]
async fn detach_final_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::not_found("Injecting error 5"));

    let err = detach(&conn).await.unwrap_err();
    assert!(err.detached());
}

#[tokio::test]
async fn detach_transient_error() {
    let conn = connect(MemoryTransport::new());
    conn.transport().push_error(Status::deadline_exceeded("Injecting error 4"));

    let err = detach(&conn).await.unwrap_err();
    assert!(!err.detached());
}

#[tokio::test]
async fn every_code_is_classified_consistently() {
    for code in Code::ALL.into_iter().filter(|c| *c != Code::Ok) {
        let expect_detached = DEFAULT_FINAL_CODES.contains(&code);

        let conn = connect(MemoryTransport::new());
        conn.transport().push_error(Status::new(code, "injected"));
        conn.transport().push_error(Status::new(code, "injected"));

        let attach_err = attach(&conn, false).await.unwrap_err();
        let detach_err = detach(&conn).await.unwrap_err();
        assert_eq!(attach_err.detached(), expect_detached, "attach {code}");
        assert_eq!(detach_err.detached(), expect_detached, "detach {code}");
        assert_eq!(attach_err.error().code(), code);
    }
}

#[tokio::test]
async fn custom_final_codes() {
    common::init_logger();
    let conn = Connection::with_transport(
        MemoryTransport::new(),
        Duration::from_secs(10),
        FinalCodes::new([Code::FailedPrecondition]),
    );
    conn.transport().push_error(Status::new(Code::FailedPrecondition, "pending"));
    conn.transport().push_error(Status::not_found("gone"));

    let pending = detach(&conn).await.unwrap_err();
    assert!(pending.detached());
    let gone = detach(&conn).await.unwrap_err();
    assert!(!gone.detached());

    for err in [pending, gone] {
        assert_eq!(err.class(), conn.final_codes().classify(err.error().code()));
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_driver_times_out_as_transient() {
    common::init_logger();
    let conn = Connection::with_transport(
        MemoryTransport::new().with_latency(Duration::from_secs(5)),
        Duration::from_millis(50),
        FinalCodes::default(),
    );
    conn.transport()
        .push_response(CsiMessage::VolumeUnpublished(ControllerUnpublishVolumeResponse {}));

    let started = Instant::now();
    let err = detach(&conn).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!err.detached());
    assert_eq!(err.error().code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn caller_deadline_tighter_than_timeout() {
    let conn = connect(MemoryTransport::new().with_latency(Duration::from_secs(5)));
    conn.transport().push_response(CsiMessage::ProbeResult(ProbeResponse {}));

    let started = Instant::now();
    let err = conn
        .probe(Some(Instant::now() + Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(err.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn expired_deadline_does_not_issue_rpc() {
    let conn = connect(MemoryTransport::new());
    let deadline = Instant::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = conn
        .attach(
            Some(deadline),
            &VolumeId::from(VOLUME),
            false,
            NODE,
            &default_capability(),
        )
        .await
        .unwrap_err();
    assert!(!err.detached());
    assert_eq!(err.error().code(), Code::DeadlineExceeded);
    assert!(conn.transport().requests().is_empty());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operations_fail_after_close() {
    let conn = connect(MemoryTransport::new());
    conn.close().await;
    conn.close().await;

    assert!(conn.is_closed());
    assert_eq!(conn.transport().close_calls(), 1);

    assert_eq!(
        conn.get_driver_name(None).await.unwrap_err(),
        CsiError::ConnectionClosed
    );
    assert_eq!(
        conn.supports_controller_publish(None).await.unwrap_err(),
        CsiError::ConnectionClosed
    );

    let err = attach(&conn, false).await.unwrap_err();
    assert_eq!(err.error(), &CsiError::ConnectionClosed);
    assert!(!err.detached());

    let err = detach(&conn).await.unwrap_err();
    assert!(!err.detached());

    assert!(conn.transport().requests().is_empty());
}

#[tokio::test]
async fn concurrent_operations_share_one_connection() {
    let transport = MemoryTransport::new().with_handler(|request| match request {
        CsiMessage::ControllerPublishVolume(req) => {
            CsiMessage::VolumePublished(ControllerPublishVolumeResponse {
                publish_volume_info: Some(HashMap::from([(
                    "volume".to_owned(),
                    req.volume_id.to_string(),
                )])),
            })
        }
        CsiMessage::ControllerUnpublishVolume(_) => {
            CsiMessage::VolumeUnpublished(ControllerUnpublishVolumeResponse {})
        }
        other => CsiMessage::Error(Status::unimplemented(other.method())),
    });
    let conn = Arc::new(connect(transport.with_latency(Duration::from_millis(10))));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let conn = Arc::clone(&conn);
        tasks.push(tokio::spawn(async move {
            let volume = VolumeId::from(format!("vol-{i}"));
            let info = conn
                .attach(None, &volume, false, NODE, &default_capability())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(info["volume"], volume.0);
            conn.detach(None, &volume, NODE).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(conn.transport().requests().len(), 32);
}

#[tokio::test]
async fn usable_as_trait_object() {
    let conn: Box<dyn CsiConnection> = Box::new(connect(MemoryTransport::new()));
    conn.close().await;
    assert_eq!(
        conn.get_driver_name(None).await.unwrap_err(),
        CsiError::ConnectionClosed
    );
}
