//! In-process HTTP target for engine tests.

use axum::Router;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral local port and return its base address.
pub async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
