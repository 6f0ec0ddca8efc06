//! Long-poll loop
//!
//! Reads the supervisor's current transport on every iteration, so a rebuilt
//! transport is picked up without restarting the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::MessageHandler;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::IncomingMessage;

pub struct Poller {
    supervisor: Arc<ConnectionSupervisor>,
    handler: Arc<MessageHandler>,
    /// Pause after a poll error that did not lead to a new transport
    error_backoff: Duration,
}

impl Poller {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, handler: Arc<MessageHandler>) -> Self {
        Self {
            supervisor,
            handler,
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Poll until shutdown. Each update is handled on its own task.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut offset = 0i64;
        info!("Polling for updates");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let active = self.supervisor.current();
            let polled = tokio::select! {
                polled = active.transport.poll(offset) => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.dispatch(message);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        kind = e.kind(),
                        generation = active.generation,
                        "Polling error"
                    );
                    tokio::select! {
                        _ = self.supervisor.on_fault(active.generation, &e) => {}
                        _ = shutdown.changed() => break,
                    }

                    if self.supervisor.current().generation == active.generation {
                        tokio::select! {
                            _ = tokio::time::sleep(self.error_backoff) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
        }

        info!("Poller stopped");
    }

    fn dispatch(&self, message: IncomingMessage) {
        debug!(chat_id = message.chat.id, message_id = message.message_id, "Dispatching message");
        let handler = self.handler.clone();
        tokio::spawn(async move {
            handler.handle(&message).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use crate::bot::tests::{supervised, update, ChatTransport, StaticBackend};
    use crate::error::RelayError;
    use crate::lookup::{QueryClient, QueryPolicy};
    use crate::proxy::manager::tests::{proxy, QueuedSource, ScriptedProbe};
    use crate::proxy::{PoolManagerConfig, ProxyPool, ProxyPoolManager};

    fn pooled_manager(size: u16) -> Arc<ProxyPoolManager> {
        Arc::new(ProxyPoolManager::new(
            Arc::new(QueuedSource::default()),
            Arc::new(ScriptedProbe::default()),
            Arc::new(ProxyPool::with_proxies((1..=size).map(proxy).collect())),
            PoolManagerConfig::default(),
        ))
    }

    fn poller_with_backend(
        transports: Vec<Arc<ChatTransport>>,
        manager: Option<Arc<ProxyPoolManager>>,
        backend: StaticBackend,
    ) -> (Arc<Poller>, watch::Sender<bool>) {
        let (supervisor, tx) = supervised(transports, manager);
        let client = QueryClient::new(Arc::new(backend), None, QueryPolicy::default());
        let handler = Arc::new(MessageHandler::new(
            supervisor.clone(),
            Arc::new(client),
            3900,
            Duration::from_millis(200),
        ));
        (Arc::new(Poller::new(supervisor, handler)), tx)
    }

    fn poller(
        transports: Vec<Arc<ChatTransport>>,
        manager: Option<Arc<ProxyPoolManager>>,
    ) -> (Arc<Poller>, watch::Sender<bool>) {
        poller_with_backend(transports, manager, StaticBackend::new(json!({ "status": 404 })))
    }

    fn spawn_run(poller: &Arc<Poller>, tx: &watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
        let poller = poller.clone();
        let rx = tx.subscribe();
        tokio::spawn(async move { poller.run(rx).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_updates_and_advances_offset() {
        let chat = Arc::new(ChatTransport::scripted(vec![Ok(vec![
            update(10, Some("/start")),
            update(11, None),
        ])]));
        let (poller, tx) = poller(vec![chat.clone()], None);

        let task = spawn_run(&poller, &tx);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*chat.offsets.lock(), vec![0, 12]);
        let sent = chat.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Bem-vindo"));

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fault_moves_to_rebuilt_transport() {
        let first = Arc::new(ChatTransport::scripted(vec![Err(RelayError::Timeout)]));
        let second = Arc::new(ChatTransport::scripted(vec![Ok(vec![update(
            5,
            Some("/help"),
        )])]));
        let (poller, tx) = poller(vec![first.clone(), second.clone()], Some(pooled_manager(2)));

        let task = spawn_run(&poller, &tx);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(first.closed.load(Ordering::Acquire));
        assert!(first.sent_texts().is_empty());
        assert!(second.sent_texts()[0].contains("AJUDA"));
        // Polling resumed on the new transport past the delivered update
        assert_eq!(second.offsets.lock()[1], 6);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_in_flight_delivers_after_reconnect() {
        let first = Arc::new(ChatTransport::scripted(vec![
            Ok(vec![update(1, Some("/consulta 123.456.789-09"))]),
            Err(RelayError::Timeout),
        ]));
        let second = Arc::new(ChatTransport::default());
        let backend = StaticBackend::slow(
            json!({
                "status": 200,
                "DadosBasicos": { "nome": "FULANO DE TAL", "cpf": "12345678909" }
            }),
            Duration::from_secs(20),
        );
        let (poller, tx) = poller_with_backend(
            vec![first.clone(), second.clone()],
            Some(pooled_manager(2)),
            backend,
        );

        let task = spawn_run(&poller, &tx);
        tokio::time::sleep(Duration::from_secs(60)).await;

        // The notice went out before the fault, the result after the rebuild
        assert!(first.closed.load(Ordering::Acquire));
        assert_eq!(first.sent_texts().len(), 1);
        let delivered = second.sent_texts();
        assert!(!delivered.is_empty(), "result lost across the reconnect");
        assert!(delivered[0].starts_with("📋"));
        assert!(delivered.iter().any(|s| s.contains("FULANO DE TAL")));
        assert_eq!(second.deleted(), vec![(100, 1)]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_backs_off_and_continues() {
        let chat = Arc::new(ChatTransport::scripted(vec![
            Err(RelayError::Transport("Bad Request".into())),
            Ok(vec![update(1, Some("hello"))]),
        ]));
        let (poller, tx) = poller(vec![chat.clone()], None);

        let task = spawn_run(&poller, &tx);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(chat.sent_texts().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            chat.sent_texts(),
            vec![crate::bot::handler::INVALID_KEY_TEXT.to_string()]
        );

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_long_poll() {
        let chat = Arc::new(ChatTransport::default());
        let (poller, tx) = poller(vec![chat.clone()], None);

        let task = spawn_run(&poller, &tx);
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(chat.offsets.lock().len(), 1);
    }
}
