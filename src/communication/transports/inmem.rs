use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::communication::transports::{TransportConn, TransportError};

type ChanTx = mpsc::Sender<String>;
type ChanRx = mpsc::Receiver<String>;

const PAIR_CAPACITY: usize = 1024;

/*──────────────────────────────────────────────────────────────────────────────*/
/* Per-end connection                                                           */
/*──────────────────────────────────────────────────────────────────────────────*/

/// One end of an in-process duplex pipe.
pub struct InMemConn {
    // Taken on close so the far end observes end-of-stream.
    tx: Mutex<Option<ChanTx>>,
    // Handed out exactly once; further `recv()` calls return a closed channel.
    rx_once: Mutex<Option<ChanRx>>,
}

impl InMemConn {
    /// Two connected ends: whatever one sends, the other receives.
    pub fn pair() -> (Arc<InMemConn>, Arc<InMemConn>) {
        let (a_tx, b_rx) = mpsc::channel::<String>(PAIR_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel::<String>(PAIR_CAPACITY);
        let a = Arc::new(InMemConn {
            tx: Mutex::new(Some(a_tx)),
            rx_once: Mutex::new(Some(a_rx)),
        });
        let b = Arc::new(InMemConn {
            tx: Mutex::new(Some(b_tx)),
            rx_once: Mutex::new(Some(b_rx)),
        });
        (a, b)
    }
}

#[async_trait::async_trait]
impl TransportConn for InMemConn {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        // Clone the sender so the lock is not held across the await.
        let tx = self
            .tx
            .lock()
            .expect("poisoned")
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(text)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn recv(&self) -> ChanRx {
        let mut guard = self.rx_once.lock().expect("poisoned");
        if let Some(rx) = guard.take() {
            rx
        } else {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    async fn close(&self) {
        self.tx.lock().expect("poisoned").take();
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Tests                                                                        */
/*──────────────────────────────────────────────────────────────────────────────*/

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_send_receive() {
        let (a, b) = InMemConn::pair();
        let mut rx_b = b.recv();
        let mut rx_a = a.recv();

        a.send_text("hello".into()).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), "hello");

        b.send_text("pong".into()).await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn multiple_messages_order_preserved() {
        let (a, b) = InMemConn::pair();
        let mut rx_b = b.recv();
        for i in 0..10 {
            a.send_text(i.to_string()).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx_b.recv().await.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn recv_only_once_returns_closed_after() {
        let (a, b) = InMemConn::pair();
        let mut rx_b = b.recv();
        let mut rx_b2 = b.recv();

        a.send_text("one".into()).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), "one");
        assert!(rx_b2.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_ends_the_far_side_stream() {
        let (a, b) = InMemConn::pair();
        let mut rx_b = b.recv();
        a.close().await;
        assert!(rx_b.recv().await.is_none());
        assert!(matches!(
            a.send_text("late".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn dropping_receiver_causes_sender_error() {
        let (a, b) = InMemConn::pair();
        drop(b.recv());
        let err = a.send_text("lost".into()).await.unwrap_err();
        assert_eq!(err, TransportError::ConnectionClosed);
    }
}
