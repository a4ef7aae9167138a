//! Spawns a tracking server on a background thread for client tests.

use std::net::SocketAddr;
use std::sync::mpsc;

use runlog_server::state::AppState;
use runlog_server::AuthConfig;

pub const TOKEN: &str = "test-token";
pub const USERNAME: &str = "tester";

/// Start a server requiring `USERNAME`/`TOKEN` and return its base URI.
pub fn spawn_server() -> (String, AppState) {
    let state = AppState::new(Some(AuthConfig {
        username: Some(USERNAME.to_string()),
        token: TOKEN.to_string(),
    }));
    let server_state = state.clone();
    let (tx, rx) = mpsc::channel::<SocketAddr>();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("server runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("addr")).expect("send addr");
            runlog_server::serve_listener(listener, server_state)
                .await
                .expect("serve");
        });
    });

    let addr = rx.recv().expect("server address");
    (format!("http://{addr}"), state)
}
