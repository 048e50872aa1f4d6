//! Route pattern and upgrade router tests.

use roomcast_server::*;

fn noop() -> Handler {
    Handler::function(|_ctx| async { Ok(()) })
}

fn committed(patterns: &[&str]) -> CommittedRouter {
    let mut router = UpgradeRouter::new();
    for pattern in patterns {
        router.register(pattern, noop(), vec![]).unwrap();
    }
    router.commit(&[], &MiddlewareRegistry::new()).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Patterns
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn static_and_param_segments() {
    let p = RoutePattern::parse("/chat/:room").unwrap();
    assert_eq!(p.matches("/chat/general").unwrap().get("room"), Some("general"));
    assert!(p.matches("/chat").is_none());
    assert!(p.matches("/chat/general/extra").is_none());
    assert!(p.matches("/other/general").is_none());
}

#[test]
fn optional_trailing_param() {
    let p = RoutePattern::parse("/feed/:id?").unwrap();
    assert!(p.matches("/feed").unwrap().get("id").is_none());
    assert_eq!(p.matches("/feed/7").unwrap().get("id"), Some("7"));
}

#[test]
fn wildcard_captures_rest() {
    let p = RoutePattern::parse("/files/*").unwrap();
    assert_eq!(p.matches("/files/a/b/c").unwrap().get("*"), Some("a/b/c"));
    assert_eq!(p.matches("/files").unwrap().get("*"), Some(""));
}

#[test]
fn empty_segments_are_ignored() {
    let p = RoutePattern::parse("/chat/:room/").unwrap();
    assert!(p.matches("/chat//lobby/").is_some());
    assert!(RoutePattern::parse("/").unwrap().matches("/").is_some());
}

#[test]
fn invalid_patterns_are_rejected() {
    assert!(RoutePattern::parse("/a/*/b").is_err());
    assert!(RoutePattern::parse("/a/:").is_err());
    assert!(RoutePattern::parse("/a/:x?/b").is_err());
    assert!(RoutePattern::parse("/a/:x/:x").is_err());

    let mut router = UpgradeRouter::new();
    let err = router.register("/a/*/b", noop(), vec![]).err().unwrap();
    assert!(matches!(err, RouterError::InvalidPattern { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn match_extracts_params() {
    let router = committed(&["/chat/:room"]);
    let m = router.match_path("/chat/general").unwrap();
    assert_eq!(m.route.pattern.as_str(), "/chat/:room");
    assert_eq!(m.params.get("room"), Some("general"));
}

#[test]
fn no_match_returns_none() {
    let router = committed(&["/chat/:room"]);
    assert!(router.match_path("/unknown").is_none());
    assert!(committed(&[]).match_path("/").is_none());
}

#[test]
fn overlapping_patterns_first_registered_wins() {
    let router = committed(&["/chat/:room", "/chat/lobby"]);
    let m = router.match_path("/chat/lobby").unwrap();
    assert_eq!(m.route.pattern.as_str(), "/chat/:room");

    let router = committed(&["/chat/lobby", "/chat/:room"]);
    let m = router.match_path("/chat/lobby").unwrap();
    assert_eq!(m.route.pattern.as_str(), "/chat/lobby");
    assert_eq!(router.match_path("/chat/other").unwrap().route.pattern.as_str(), "/chat/:room");
}

#[test]
fn wildcard_registered_first_shadows_everything() {
    let router = committed(&["/*", "/chat/:room"]);
    assert_eq!(router.match_path("/chat/a").unwrap().route.pattern.as_str(), "/*");
}

#[test]
fn reregistering_a_pattern_keeps_its_slot() {
    let mut router = UpgradeRouter::new();
    router.register("/a/:x", noop(), vec![]).unwrap();
    router.register("/a/b", noop(), vec![]).unwrap();
    router
        .register("/a/:x", Handler::method("Replacement", None), vec![])
        .unwrap();
    assert_eq!(router.len(), 2);

    let router = router.commit(&[], &MiddlewareRegistry::new()).unwrap();
    assert_eq!(router.patterns(), vec!["/a/:x", "/a/b"]);
    let m = router.match_path("/a/b").unwrap();
    assert!(matches!(&m.route.handler, Handler::Method { controller, .. } if controller == "Replacement"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Commit / middleware composition
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn global_middleware_runs_before_route_middleware() {
    let registry = MiddlewareRegistry::new();
    registry.register("auth", FnMiddleware::new("auth", |_| MiddlewareResult::allow()));
    registry.register("log", FnMiddleware::new("log", |_| MiddlewareResult::allow()));

    let mut router = UpgradeRouter::new();
    router
        .register(
            "/chat/:room",
            noop(),
            vec![
                MiddlewareRef::named("log"),
                MiddlewareRef::inline(FnMiddleware::new("inline", |_| MiddlewareResult::allow())),
            ],
        )
        .unwrap();

    let router = router.commit(&[MiddlewareRef::named("auth")], &registry).unwrap();
    let m = router.match_path("/chat/x").unwrap();
    assert_eq!(m.route.middleware.names(), vec!["auth", "log", "inline"]);
}

#[test]
fn unknown_named_middleware_fails_commit() {
    let mut router = UpgradeRouter::new();
    router.register("/a", noop(), vec!["missing".into()]).unwrap();
    let err = router.commit(&[], &MiddlewareRegistry::new()).unwrap_err();
    assert_eq!(
        err,
        RouterError::UnknownMiddleware {
            pattern: "/a".into(),
            middleware: "missing".into(),
        }
    );
}

#[test]
fn method_handler_defaults_to_handle() {
    let handler = Handler::method("ChatController", None);
    assert!(matches!(handler, Handler::Method { method, .. } if method == "handle"));
}
