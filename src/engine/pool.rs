use tokio::sync::{mpsc, Mutex};

use crate::engine::user::User;

/// Bounded FIFO of provisioned users. `put` waits while full and `acquire`
/// waits while empty.
#[derive(Debug)]
pub struct UserPool {
    tx: mpsc::Sender<User>,
    rx: Mutex<mpsc::Receiver<User>>,
}

impl UserPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn put(&self, user: User) {
        // The pool owns its receiver, so the channel cannot be closed here.
        let _ = self.tx.send(user).await;
    }

    /// Wait for the next user. `None` only if the channel closed.
    pub async fn acquire(&self) -> Option<User> {
        self.rx.lock().await.recv().await
    }
}
