//! Drives `ConsoleApp` against the mock hgdb backend in `tests/support`,
//! per spec.md §8's console scenarios.

#[path = "../support/mod.rs"]
mod support;

use hgdb_adapter::adapter::Adapter;
use hgdb_adapter::console::{command, ConsoleApp, Turn};
use serde_json::{json, Value};
use support::{single_instance_break, MockServer};

async fn drain_and_ack(mock: &mut MockServer, payloads: Vec<Value>) {
    for payload in payloads {
        let req = mock.recv_request().await;
        mock.reply(req["token"].as_str().expect("token"), payload);
    }
}

async fn connected_app(mock: &mut MockServer) -> ConsoleApp {
    connected_app_with_files(mock, vec![]).await
}

/// Like [`connected_app`], but also seeds the post-connect `debugger-info
/// {command: "filenames"}` round trip (spec.md §3 "Filename index") with an
/// explicit file list, so bare-basename resolution has something to resolve
/// against.
async fn connected_app_with_files(mock: &mut MockServer, files: Vec<&str>) -> ConsoleApp {
    let mut adapter = Adapter::new("test-");
    adapter.start("127.0.0.1", mock.port);
    adapter.wait_connected().await.expect("handshake");

    let (connect, _) = tokio::join!(
        adapter.connect("top.db".into(), None),
        drain_and_ack(mock, vec![json!({ "status": "connected" }), json!(files)]),
    );
    connect.expect("connection request");

    ConsoleApp::new(adapter, None).expect("console app")
}

/// spec.md §8 S1 as seen from the console: set a breakpoint, continue,
/// hit it, then read a local through the scope cache without another round
/// trip and write one back through `set`.
#[tokio::test]
async fn break_continue_print_and_set_round_trip() {
    let mut mock = MockServer::start().await;
    let mut app = connected_app(&mut mock).await;

    let break_cmd = command::parse("b /local/top.sv:5").unwrap().unwrap();
    let (turn, _) = tokio::join!(
        app.dispatch_line(break_cmd),
        drain_and_ack(
            &mut mock,
            vec![
                json!([{ "id": 1, "line_num": 5, "column_num": 1 }]),
                json!({}),
            ],
        ),
    );
    assert!(matches!(turn, Turn::Continue));

    let continue_cmd = command::parse("c").unwrap().unwrap();
    let (turn, _) = tokio::join!(app.dispatch_line(continue_cmd), async {
        let req = mock.recv_request().await;
        assert_eq!(req["payload"]["command"], "continue");
        mock.reply(req["token"].as_str().unwrap(), json!({}));
        mock.push_break(single_instance_break(1, 1, json!({ "x": "42" })));
    });
    assert!(matches!(turn, Turn::Continue));
    assert_eq!(app.adapter().session.current_instance_id(), Some(1));

    // Cached read: resolves from the scope tree, no request sent.
    let print_cmd = command::parse("p x").unwrap().unwrap();
    let turn = app.dispatch_line(print_cmd).await;
    assert!(matches!(turn, Turn::Continue));

    // `set` always forwards to the server.
    let set_cmd = command::parse("set x=7").unwrap().unwrap();
    let (turn, _) = tokio::join!(app.dispatch_line(set_cmd), async {
        let req = mock.recv_request().await;
        assert_eq!(req["type"], "set-value");
        assert_eq!(req["payload"]["var_name"], "x");
        assert_eq!(req["payload"]["value"], 7);
        assert_eq!(req["payload"]["breakpoint_id"], 1);
        mock.reply(req["token"].as_str().unwrap(), json!({}));
    });
    assert!(matches!(turn, Turn::Continue));
    assert!(app
        .adapter()
        .break_context()
        .unwrap()
        .set_values
        .contains("x"));
}

/// spec.md §8: `set` rejects before any break context exists instead of
/// sending a request with a nonsensical breakpoint id.
#[tokio::test]
async fn set_before_any_break_is_rejected_without_a_request() {
    let mut mock = MockServer::start().await;
    let mut app = connected_app(&mut mock).await;

    let set_cmd = command::parse("set x=1").unwrap().unwrap();
    let turn = app.dispatch_line(set_cmd).await;
    assert!(matches!(turn, Turn::Continue));
    assert!(app.adapter().break_context().is_none());
}

/// spec.md §3/§4.9: a bare basename is expanded via the filename index the
/// adapter builds right after connect, so `b top.sv` reaches the server as
/// the full remote path it was given in the post-connect file list.
#[tokio::test]
async fn bare_basename_resolves_through_the_post_connect_filename_index() {
    let mut mock = MockServer::start().await;
    let mut app = connected_app_with_files(&mut mock, vec!["/remote/src/top.sv"]).await;

    let break_cmd = command::parse("b top.sv:5").unwrap().unwrap();
    let (_, sent_filename) = tokio::join!(app.dispatch_line(break_cmd), async {
        let req = mock.recv_request().await;
        mock.reply(req["token"].as_str().unwrap(), json!([{ "id": 1, "line_num": 5, "column_num": 1 }]));
        let commit = mock.recv_request().await;
        mock.reply(commit["token"].as_str().unwrap(), json!({}));
        req["payload"]["filename"].as_str().unwrap().to_string()
    });
    assert_eq!(sent_filename, "/remote/src/top.sv");
}
