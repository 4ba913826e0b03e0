//! End-to-end adapter scenarios against the mock CDM.

use std::sync::{Arc, Mutex};

use widevine_cdm_api::{Exception, KeyStatus, QueryResult};

use crate::session::{Session, SessionSink};
use crate::system::LicenseType;
use crate::{Error, OpenCDMError};

use super::mock_cdm::{
    Fixture, MockConfig, drive_expiration_change, drive_keys_change,
    drive_output_protection_query, drive_session_closed, drive_storage_id_request, mock_system,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkEvent {
    Challenge(Vec<u8>),
    KeyUpdated(Vec<u8>),
    KeysUpdated,
    Error(String),
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("events poisoned").clone()
    }
}

impl SessionSink for Arc<RecordingSink> {
    fn challenge(&self, _session: &Session, payload: &[u8]) {
        self.events
            .lock()
            .expect("events poisoned")
            .push(SinkEvent::Challenge(payload.to_vec()));
    }

    fn key_updated(&self, _session: &Session, key_id: &[u8]) {
        self.events
            .lock()
            .expect("events poisoned")
            .push(SinkEvent::KeyUpdated(key_id.to_vec()));
    }

    fn keys_updated(&self, _session: &Session) {
        self.events
            .lock()
            .expect("events poisoned")
            .push(SinkEvent::KeysUpdated);
    }

    fn error(&self, _session: &Session, message: &str) {
        self.events
            .lock()
            .expect("events poisoned")
            .push(SinkEvent::Error(message.to_string()));
    }
}

fn construct(fixture: &Fixture, sink: &Arc<RecordingSink>) -> Arc<Session> {
    fixture
        .system
        .construct_session(
            LicenseType::Temporary,
            "cenc",
            b"init-data",
            Box::new(Arc::clone(sink)),
        )
        .expect("construct session")
}

#[test]
fn construct_session_returns_cdm_session_id() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());

    let session = construct(&fixture, &sink);
    assert_eq!(session.id(), "sess-1");
    assert!(fixture.system.session("sess-1").is_some());
    assert_eq!(
        sink.events(),
        vec![SinkEvent::Challenge(b"challenge".to_vec())]
    );
}

#[test]
fn construct_session_rejects_unknown_init_data_type() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());

    let err = fixture
        .system
        .construct_session(LicenseType::Temporary, "cbcs", b"", Box::new(sink))
        .expect_err("unknown init data type");
    assert_eq!(err.open_cdm_error(), OpenCDMError::InvalidArg);
}

#[test]
fn construct_session_fails_when_cdm_initialization_fails() {
    let fixture = mock_system(MockConfig {
        init_success: false,
        ..MockConfig::default()
    });
    let sink = Arc::new(RecordingSink::default());

    let err = fixture
        .system
        .construct_session(LicenseType::Temporary, "cenc", b"", Box::new(sink))
        .expect_err("initialization failure");
    assert!(matches!(err, Error::CdmInitFailed));
    assert_eq!(err.open_cdm_error(), OpenCDMError::Fail);
}

#[test]
fn update_rejection_maps_to_fail_and_reports_once() {
    let fixture = mock_system(MockConfig {
        reject_update: Some((Exception::INVALID_STATE_ERROR, 0, "bad state".to_string())),
        ..MockConfig::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    let err = session.update(b"license-response").expect_err("rejected");
    assert_eq!(err.open_cdm_error(), OpenCDMError::Fail);

    let errors: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, SinkEvent::Error(_)))
        .collect();
    assert_eq!(errors, vec![SinkEvent::Error("bad state".to_string())]);
}

#[test]
fn update_success_resolves_quietly() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    session.update(b"license-response").expect("update");
    assert!(
        !sink
            .events()
            .iter()
            .any(|event| matches!(event, SinkEvent::Error(_)))
    );
}

#[test]
fn close_session_evicts_it_from_the_map() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    session.close().expect("close");
    assert!(fixture.system.session("sess-1").is_none());
}

#[test]
fn remove_session_evicts_it_from_the_map() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    session.remove().expect("remove");
    assert!(fixture.system.session("sess-1").is_none());
}

#[test]
fn load_session_resolves() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    session.load().expect("load");
}

#[test]
fn cdm_initiated_close_drops_the_session() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let _session = construct(&fixture, &sink);

    drive_session_closed(fixture.cdm.host(), "sess-1");
    assert!(fixture.system.session("sess-1").is_none());
}

#[test]
fn keys_change_updates_the_table_and_notifies_in_order() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    drive_keys_change(
        fixture.cdm.host(),
        "sess-1",
        &[(b"key-1", KeyStatus::USABLE, 0), (b"key-2", KeyStatus::EXPIRED, 7)],
    );

    assert_eq!(session.key_status(b"key-1"), KeyStatus::USABLE);
    assert_eq!(session.key_status(b"key-2"), KeyStatus::EXPIRED);
    assert_eq!(session.key_status(b"other"), KeyStatus::STATUS_PENDING);
    assert!(session.has_key(b"key-1"));
    assert!(!session.has_key(b"other"));
    assert_eq!(session.key_info(b"key-2").expect("info").system_code, 7);

    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Challenge(b"challenge".to_vec()),
            SinkEvent::KeyUpdated(b"key-1".to_vec()),
            SinkEvent::KeyUpdated(b"key-2".to_vec()),
            SinkEvent::KeysUpdated,
        ]
    );
}

#[test]
fn later_key_delivery_overwrites_the_status() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    drive_keys_change(fixture.cdm.host(), "sess-1", &[(b"key-1", KeyStatus::STATUS_PENDING, 0)]);
    drive_keys_change(fixture.cdm.host(), "sess-1", &[(b"key-1", KeyStatus::USABLE, 0)]);
    assert_eq!(session.key_status(b"key-1"), KeyStatus::USABLE);
}

#[test]
fn keys_change_for_unknown_session_is_dropped() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let _session = construct(&fixture, &sink);

    drive_keys_change(fixture.cdm.host(), "no-such-session", &[(b"key-1", KeyStatus::USABLE, 0)]);
    assert_eq!(
        sink.events(),
        vec![SinkEvent::Challenge(b"challenge".to_vec())]
    );
}

#[test]
fn session_lookup_by_key_id() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    assert!(fixture.system.session_for_key(b"key-1").is_none());
    drive_keys_change(fixture.cdm.host(), "sess-1", &[(b"key-1", KeyStatus::USABLE, 0)]);
    let found = fixture.system.session_for_key(b"key-1").expect("lookup");
    assert_eq!(found.id(), session.id());
}

#[test]
fn expiration_change_updates_the_session() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    assert_eq!(session.expiration(), 0.0);
    drive_expiration_change(fixture.cdm.host(), "sess-1", 1_700_000_000.0);
    assert_eq!(session.expiration(), 1_700_000_000.0);
}

#[test]
fn set_server_certificate_resolves() {
    let fixture = mock_system(MockConfig::default());
    fixture
        .system
        .set_server_certificate(b"certificate-bytes")
        .expect("certificate");
}

#[test]
fn decrypt_without_subsamples_rewrites_the_whole_buffer() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    let mut buffer = vec![0x10u8, 0x20, 0x30, 0x40];
    session
        .decrypt(&mut buffer, &[], 0, b"0123456789abcdef", b"key-1")
        .expect("decrypt");
    assert_eq!(buffer, vec![0xEF, 0xDF, 0xCF, 0xBF]);
}

#[test]
fn decrypt_with_subsamples_only_touches_cipher_ranges() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    // Two records: {clear 2, cipher 4} and {clear 1, cipher 3}.
    let descriptors = [
        0x00, 0x02, 0x00, 0x00, 0x00, 0x04, //
        0x00, 0x01, 0x00, 0x00, 0x00, 0x03,
    ];
    const A: u8 = b'A';
    const B: u8 = b'B';
    const X: u8 = b'X';
    let mut buffer = vec![A, A, X, X, X, X, B, X, X, X];

    session
        .decrypt(&mut buffer, &descriptors, 2, b"iv", b"key-1")
        .expect("decrypt");
    assert_eq!(buffer, vec![A, A, !X, !X, !X, !X, B, !X, !X, !X]);
}

#[test]
fn decrypt_maps_no_key_to_invalid_session() {
    let fixture = mock_system(MockConfig {
        decrypt_no_key: true,
        ..MockConfig::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    let mut buffer = vec![1u8, 2, 3];
    let err = session
        .decrypt(&mut buffer, &[], 0, b"iv", b"key-1")
        .expect_err("no key");
    assert_eq!(err.open_cdm_error(), OpenCDMError::InvalidSession);
    assert_eq!(buffer, vec![1, 2, 3]);
}

#[test]
fn decrypt_fails_on_truncated_descriptors() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    let mut buffer = vec![0u8; 8];
    let err = session
        .decrypt(&mut buffer, &[0x00, 0x01, 0x00], 2, b"iv", b"key-1")
        .expect_err("truncated descriptors");
    assert_eq!(err.open_cdm_error(), OpenCDMError::Fail);
}

#[test]
fn storage_id_request_is_answered_with_the_placeholder() {
    let fixture = mock_system(MockConfig::default());
    drive_storage_id_request(fixture.cdm.host(), 3);
    let requests = fixture.cdm.storage_requests.lock().expect("requests");
    assert_eq!(requests.as_slice(), &[(3, b"test".to_vec())]);
}

#[test]
fn output_protection_query_reports_no_links() {
    let fixture = mock_system(MockConfig::default());
    drive_output_protection_query(fixture.cdm.host());
    let reports = fixture.cdm.protection_reports.lock().expect("reports");
    assert_eq!(reports.as_slice(), &[(QueryResult::Succeeded, 0, 0)]);
}

#[test]
fn teardown_destroys_the_cdm_instance_once() {
    let fixture = mock_system(MockConfig::default());
    let Fixture { system, cdm } = fixture;
    assert!(!cdm.destroyed.load(std::sync::atomic::Ordering::SeqCst));
    drop(system);
    assert!(cdm.destroyed.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn session_operations_after_system_teardown_fail_cleanly() {
    let fixture = mock_system(MockConfig::default());
    let sink = Arc::new(RecordingSink::default());
    let session = construct(&fixture, &sink);

    let Fixture { system, cdm } = fixture;
    drop(system);
    let err = session.update(b"late").expect_err("system gone");
    assert!(matches!(err, Error::SystemGone));
    drop(cdm);
}
