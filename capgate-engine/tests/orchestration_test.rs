//! End-to-end request runs through the public builder

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use capgate_api::permission::*;
use capgate_api::version_codes::*;
use capgate_api::{Capability, PlatformFacts};
use capgate_engine::audit::AuditEventType;
use capgate_engine::gateway::ScriptedAnswer;
use capgate_engine::presenter::ScriptedPresenter;
use capgate_engine::{CapGate, DecisionKind, Delivery, EngineError, PlatformEvent, RequestCode};
use common::{caps, counter, Harness};

fn modern() -> PlatformFacts {
    PlatformFacts::new(TIRAMISU, TIRAMISU)
}

#[test]
fn test_all_pre_granted_completes_without_rounds() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_granted([CAMERA, RECORD_AUDIO]),
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([CAMERA, RECORD_AUDIO])
        .request(on_final)
        .unwrap();

    assert!(!h.host.is_running());
    let outcome = h.outcome();
    assert!(outcome.all_granted);
    assert_eq!(outcome.granted, caps(&[CAMERA, RECORD_AUDIO]));
    assert!(outcome.denied.is_empty());
    assert_eq!(h.gateway.request_count(), 0);
}

#[test]
fn test_soft_deny_then_retry_grants() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([(CAMERA, ScriptedAnswer::Deny)])
                .with_round([(CAMERA, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::accepting,
    );
    let explained = counter();
    let seen = explained.clone();

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(move |scope, denied, before| {
            seen.borrow_mut().push((denied.to_vec(), before));
            scope.show_request_reason_dialog(denied.to_vec(), "Scan codes", "OK", Some("Cancel"));
        })
        .request(on_final)
        .unwrap();
    h.drain();

    let outcome = h.outcome();
    assert!(outcome.all_granted);
    assert_eq!(outcome.granted, caps(&[CAMERA]));
    assert_eq!(h.gateway.request_count(), 2);
    assert_eq!(*explained.borrow(), vec![(caps(&[CAMERA]), false)]);
    assert_eq!(h.presenter.shown()[0].kind, DecisionKind::Rationale);
}

#[test]
fn test_permanent_deny_without_forward_callback() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::DenyPermanently)]),
        ScriptedPresenter::accepting,
    );
    let explained = counter();
    let seen = explained.clone();

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(move |_, denied, before| {
            seen.borrow_mut().push((denied.to_vec(), before));
        })
        .request(on_final)
        .unwrap();
    h.drain();

    let outcome = h.outcome();
    assert!(!outcome.all_granted);
    assert!(outcome.granted.is_empty());
    assert_eq!(outcome.denied, caps(&[CAMERA]));
    assert_eq!(h.gateway.settings_visits(), 0);
    assert!(explained.borrow().is_empty());
}

#[test]
fn test_unrequestable_below_minimum_version() {
    let mut h = Harness::new(
        PlatformFacts::new(Q, R),
        |g| g,
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(MANAGE_EXTERNAL_STORAGE)
        .request(on_final)
        .unwrap();

    let outcome = h.outcome();
    assert!(!outcome.all_granted);
    assert!(outcome.granted.is_empty());
    assert_eq!(outcome.denied, caps(&[MANAGE_EXTERNAL_STORAGE]));
    assert_eq!(h.gateway.request_count(), 0);
}

#[test]
fn test_auto_granted_below_m() {
    let mut h = Harness::new(
        PlatformFacts::new(M - 1, M - 1),
        |g| g,
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([SYSTEM_ALERT_WINDOW, WRITE_SETTINGS])
        .request(on_final)
        .unwrap();

    let outcome = h.outcome();
    assert!(outcome.all_granted);
    assert_eq!(outcome.granted.len(), 2);
    assert_eq!(h.gateway.request_count(), 0);
}

#[test]
fn test_explain_then_forward_carried_permanent() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([
                (CAMERA, ScriptedAnswer::Deny),
                (READ_CONTACTS, ScriptedAnswer::DenyPermanently),
            ])
            .with_round([(CAMERA, ScriptedAnswer::Grant)])
            .with_settings_grants([READ_CONTACTS])
        },
        ScriptedPresenter::accepting,
    );
    let forwarded = counter();
    let seen = forwarded.clone();

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([CAMERA, READ_CONTACTS])
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .on_forward_to_settings(move |scope, denied| {
            seen.borrow_mut().push((denied.to_vec(), false));
            scope.show_forward_to_settings_dialog(denied.to_vec(), "Open settings", "Go", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();

    let outcome = h.outcome();
    assert!(outcome.all_granted);
    assert_eq!(outcome.granted, caps(&[CAMERA, READ_CONTACTS]));
    assert_eq!(*forwarded.borrow(), vec![(caps(&[READ_CONTACTS]), false)]);
    assert_eq!(h.gateway.settings_visits(), 1);

    let requests = h.gateway.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].capabilities, caps(&[CAMERA]));
    assert!(requests[2].capabilities.contains(&Capability::from(READ_CONTACTS)));
}

#[test]
fn test_declined_decision_finishes_task() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::Deny)]),
        ScriptedPresenter::declining,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", Some("No"));
        })
        .request(on_final)
        .unwrap();
    h.drain();

    assert_eq!(h.outcome().denied, caps(&[CAMERA]));
    assert_eq!(h.gateway.request_count(), 1);
    assert_eq!(h.presenter.shown_count(), 1);
}

#[test]
fn test_empty_dialog_finishes_task() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::Deny)]),
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, _, _| {
            scope.show_request_reason_dialog(Vec::<Capability>::new(), "Nothing", "OK", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();

    assert_eq!(h.outcome().denied, caps(&[CAMERA]));
    assert_eq!(h.presenter.shown_count(), 0);
}

#[test]
fn test_explain_before_request_fires_once_per_run() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([(CAMERA, ScriptedAnswer::Grant)])
                .with_round([(SYSTEM_ALERT_WINDOW, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::accepting,
    );
    let explained = counter();
    let seen = explained.clone();

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([CAMERA, SYSTEM_ALERT_WINDOW])
        .explain_reason_before_request()
        .on_explain_request_reason(move |scope, denied, before| {
            seen.borrow_mut().push((denied.to_vec(), before));
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .request(on_final)
        .unwrap();

    // The explain callback ran before any platform round.
    assert_eq!(h.gateway.request_count(), 0);
    h.drain();

    assert!(h.outcome().all_granted);
    assert_eq!(*explained.borrow(), vec![(caps(&[CAMERA]), true)]);

    let codes: Vec<RequestCode> = h.gateway.requests().iter().map(|r| r.ticket.code).collect();
    assert_eq!(codes, vec![RequestCode::NormalRound, RequestCode::Overlay]);
}

#[test]
fn test_settings_group_refusal_is_soft() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([(SYSTEM_ALERT_WINDOW, ScriptedAnswer::DenyPermanently)])
                .with_round([(SYSTEM_ALERT_WINDOW, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::accepting,
    );
    let forwards = counter();
    let seen = forwards.clone();

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(SYSTEM_ALERT_WINDOW)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Draw overlays", "OK", None);
        })
        .on_forward_to_settings(move |_, denied| seen.borrow_mut().push((denied.to_vec(), false)))
        .request(on_final)
        .unwrap();
    h.drain();

    assert!(h.outcome().all_granted);
    assert!(forwards.borrow().is_empty());
    assert!(h
        .gateway
        .requests()
        .iter()
        .all(|r| r.ticket.code == RequestCode::Overlay));
}

#[test]
fn test_background_location_needs_foreground_grant() {
    let mut h = Harness::new(PlatformFacts::new(R, R), |g| g, ScriptedPresenter::accepting);

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(ACCESS_BACKGROUND_LOCATION)
        .request(on_final)
        .unwrap();

    assert_eq!(h.outcome().denied, caps(&[ACCESS_BACKGROUND_LOCATION]));
    assert_eq!(h.gateway.request_count(), 0);
}

#[test]
fn test_background_location_after_foreground_round() {
    let mut h = Harness::new(
        PlatformFacts::new(R, R),
        |g| {
            g.with_round([(ACCESS_FINE_LOCATION, ScriptedAnswer::Grant)])
                .with_round([(ACCESS_BACKGROUND_LOCATION, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([ACCESS_FINE_LOCATION, ACCESS_BACKGROUND_LOCATION])
        .request(on_final)
        .unwrap();
    h.drain();

    assert!(h.outcome().all_granted);
    let codes: Vec<RequestCode> = h.gateway.requests().iter().map(|r| r.ticket.code).collect();
    assert_eq!(codes, vec![RequestCode::NormalRound, RequestCode::BackgroundLocation]);
}

#[test]
fn test_background_location_rides_ordinary_round_on_q() {
    let mut h = Harness::new(
        PlatformFacts::new(Q, Q),
        |g| {
            g.with_round([
                (ACCESS_FINE_LOCATION, ScriptedAnswer::Grant),
                (ACCESS_BACKGROUND_LOCATION, ScriptedAnswer::Grant),
            ])
        },
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([ACCESS_FINE_LOCATION, ACCESS_BACKGROUND_LOCATION])
        .request(on_final)
        .unwrap();
    h.drain();

    assert!(h.outcome().all_granted);
    let requests = h.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].capabilities.len(), 2);
}

#[test]
fn test_revoked_grant_is_requested_again() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([
                (CAMERA, ScriptedAnswer::Grant),
                (RECORD_AUDIO, ScriptedAnswer::Deny),
            ])
            .with_round([
                (CAMERA, ScriptedAnswer::Grant),
                (RECORD_AUDIO, ScriptedAnswer::Grant),
            ])
        },
        ScriptedPresenter::manual,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permissions([CAMERA, RECORD_AUDIO])
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();

    h.gateway.revoke(CAMERA);
    assert!(h.presenter.respond(true));
    h.drain();

    assert!(h.outcome().all_granted);
    let requests = h.gateway.requests();
    assert_eq!(requests[1].capabilities, caps(&[CAMERA, RECORD_AUDIO]));
}

#[test]
fn test_round_limit_stops_endless_retries() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::Deny)]),
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Please", "OK", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();

    assert_eq!(h.outcome().denied, caps(&[CAMERA]));
    assert_eq!(h.gateway.request_count(), 4);
}

#[test]
fn test_second_run_while_live_is_rejected() {
    let mut h = Harness::new(modern(), |g| g, ScriptedPresenter::accepting);

    let on_final = h.on_final();
    let first = CapGate::init(&mut h.host)
        .permission(CAMERA)
        .request(on_final)
        .unwrap();
    let err = CapGate::init(&mut h.host)
        .permission(RECORD_AUDIO)
        .request(|_| {})
        .unwrap_err();

    assert_eq!(err, EngineError::RunInFlight(first));
    h.drain();
    assert_eq!(h.final_count(), 1);
}

#[test]
fn test_teardown_drops_late_events() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::Deny)]),
        ScriptedPresenter::manual,
    );

    let on_final = h.on_final();
    let run = CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();
    assert!(h.presenter.has_pending());

    h.host.teardown();
    assert_eq!(h.presenter.dismissed_count(), 1);

    let late = PlatformEvent::decision(
        capgate_engine::Ticket::new(run, RequestCode::Decision),
        true,
    );
    let delivery = h.host.deliver(late);
    assert!(matches!(delivery, Delivery::Dropped(EngineError::StaleContext { .. })));
    assert_eq!(h.final_count(), 0);
    assert_eq!(h.gateway.request_count(), 1);

    assert_eq!(h.audit.find_by_type(AuditEventType::RunAbandoned).len(), 1);
    assert_eq!(h.audit.find_by_type(AuditEventType::EventDropped).len(), 1);
}

#[test]
fn test_unexpected_event_leaves_run_untouched() {
    let mut h = Harness::new(
        modern(),
        |g| g.with_round([(CAMERA, ScriptedAnswer::Grant)]),
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    let run = CapGate::init(&mut h.host)
        .permission(CAMERA)
        .request(on_final)
        .unwrap();

    let stray = PlatformEvent::settings_returned(capgate_engine::Ticket::new(
        run,
        RequestCode::SettingsReturn,
    ));
    let delivery = h.host.deliver(stray);
    assert!(matches!(delivery, Delivery::Dropped(EngineError::UnexpectedEvent { .. })));
    assert!(h.host.is_running());

    h.drain();
    assert!(h.outcome().all_granted);
}

#[test]
fn test_audit_trail_of_a_run() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([(CAMERA, ScriptedAnswer::Deny)])
                .with_round([(CAMERA, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::accepting,
    );

    let on_final = h.on_final();
    let run = CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .request(on_final)
        .unwrap();
    h.drain();

    let types: Vec<AuditEventType> = h
        .audit
        .find_by_run(run)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            AuditEventType::RunStarted,
            AuditEventType::CapabilitiesRequested,
            AuditEventType::RoundClassified,
            AuditEventType::DecisionShown,
            AuditEventType::CapabilitiesRequested,
            AuditEventType::RoundClassified,
            AuditEventType::RunCompleted,
        ]
    );
}

#[tokio::test]
async fn test_drive_waits_for_async_decision() {
    let mut h = Harness::new(
        modern(),
        |g| {
            g.with_round([(CAMERA, ScriptedAnswer::Deny)])
                .with_round([(CAMERA, ScriptedAnswer::Grant)])
        },
        ScriptedPresenter::manual,
    );

    let on_final = h.on_final();
    CapGate::init(&mut h.host)
        .permission(CAMERA)
        .on_explain_request_reason(|scope, denied, _| {
            scope.show_request_reason_dialog(denied.to_vec(), "Needed", "OK", None);
        })
        .request(on_final)
        .unwrap();

    let presenter = h.presenter.clone();
    tokio::spawn(async move {
        while !presenter.respond(true) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let outcome = h.host.drive(&mut h.events).await.unwrap();
    assert!(outcome.all_granted);
    assert_eq!(h.final_count(), 1);
}

#[tokio::test]
async fn test_drive_returns_none_without_run() {
    let mut h = Harness::new(modern(), |g| g, ScriptedPresenter::accepting);
    assert!(h.host.drive(&mut h.events).await.is_none());

    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    CapGate::init(&mut h.host)
        .permissions(Vec::<Capability>::new())
        .request(move |o| *slot.borrow_mut() = Some(o))
        .unwrap();
    let outcome = outcome.borrow().clone().unwrap();
    assert!(outcome.all_granted);
    assert!(outcome.granted.is_empty());
}
