//! Command dispatch and the lookup pipeline

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::lookup::{LookupKey, QueryClient};
use crate::output::{format_record, split};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::{InboundTransport, IncomingMessage};

const WELCOME_TEXT: &str = "🤖 *Bem-vindo ao Bot de Consulta de CPF*

Envie um CPF para consultar os dados.

*Formato aceito:*
• 123.456.789-00
• 12345678900
• 123 456 789 00

*Comandos disponíveis:*
/start - Iniciar o bot
/help - Ver esta mensagem
/consulta <cpf> - Consultar CPF

*Exemplo:*
/consulta 123.456.789-00

⚠️ *Atenção:* Este bot é apenas para fins informativos.";

const HELP_TEXT: &str = "📖 *AJUDA*

*Como usar:*
1. Use o comando: /consulta <cpf>
2. Ou simplesmente envie o CPF diretamente

*Formatos aceitos:*
• 123.456.789-00
• 12345678900
• 123 456 789 00

*Comandos:*
/start - Iniciar o bot
/help - Ver esta mensagem
/consulta <cpf> - Consultar CPF

⚠️ Este bot é apenas para fins informativos.";

pub(crate) const INVALID_KEY_TEXT: &str = "❌ CPF inválido!

Por favor, envie um CPF válido no formato:
• 123.456.789-00
• 12345678900
• 123 456 789 00

Use /help para mais informações.";

const PROCESSING_TEXT: &str = "⏳ Consultando CPF... Por favor, aguarde.";

pub(crate) const NOT_FOUND_TEXT: &str = "❌ Não foi possível obter dados para este CPF. Verifique se o CPF está correto ou tente novamente.";

const FAILURE_TEXT: &str = "❌ Erro ao processar sua consulta. Tente novamente mais tarde.";

const EMPTY_RESULT_TEXT: &str = "❌ Nenhum dado encontrado.";

/// A parsed incoming text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// `/consulta <key>` or a bare message; the key is not validated yet
    Lookup(String),
    /// Anything else, including unknown commands
    Ignore,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Command::Ignore;
        }

        let Some(rest) = text.strip_prefix('/') else {
            return Command::Lookup(text.to_string());
        };

        let (head, arg) = match rest.split_once(char::is_whitespace) {
            Some((head, arg)) => (head, arg.trim()),
            None => (rest, ""),
        };
        // Group chats address commands as /cmd@botname
        let name = head.split('@').next().unwrap_or_default();

        match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "consulta" if !arg.is_empty() => Command::Lookup(arg.to_string()),
            _ => Command::Ignore,
        }
    }
}

/// Answers incoming messages
///
/// Every send and delete goes through the supervisor's current transport, so
/// a lookup that outlives a reconnect still delivers on the new connection.
pub struct MessageHandler {
    supervisor: Arc<ConnectionSupervisor>,
    client: Arc<QueryClient>,
    max_message_len: usize,
    message_delay: Duration,
}

impl MessageHandler {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        client: Arc<QueryClient>,
        max_message_len: usize,
        message_delay: Duration,
    ) -> Self {
        Self {
            supervisor,
            client,
            max_message_len,
            message_delay,
        }
    }

    fn transport(&self) -> Arc<dyn InboundTransport> {
        self.supervisor.current().transport.clone()
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<i64> {
        self.transport().send_message(chat_id, text).await
    }

    pub async fn handle(&self, message: &IncomingMessage) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id;

        let reply = match Command::parse(text) {
            Command::Start => Some(WELCOME_TEXT),
            Command::Help => Some(HELP_TEXT),
            Command::Ignore => None,
            Command::Lookup(raw) => match LookupKey::parse(&raw) {
                Some(key) => {
                    self.lookup(chat_id, &key).await;
                    None
                }
                None => Some(INVALID_KEY_TEXT),
            },
        };

        if let Some(reply) = reply {
            if let Err(e) = self.send(chat_id, reply).await {
                warn!(chat_id, error = %e, "Failed to send reply");
            }
        }
    }

    /// Run the full lookup for `key`. Failures end in a generic reply.
    pub async fn lookup(&self, chat_id: i64, key: &LookupKey) {
        info!(chat_id, key = %key, "New lookup");
        if let Err(e) = self.run_lookup(chat_id, key).await {
            error!(chat_id, key = %key, error = %e, "Lookup delivery failed");
            let _ = self.send(chat_id, FAILURE_TEXT).await;
        }
    }

    async fn run_lookup(&self, chat_id: i64, key: &LookupKey) -> Result<()> {
        let notice = self.send(chat_id, PROCESSING_TEXT).await?;

        let record = self.client.lookup(key.as_str()).await;

        if let Err(e) = self.transport().delete_message(chat_id, notice).await {
            debug!(error = %e, "Could not delete processing notice");
        }

        let record = match record {
            Some(record) if record.has_record() => record,
            _ => {
                warn!(key = %key, "No record returned");
                self.send(chat_id, NOT_FOUND_TEXT).await?;
                return Ok(());
            }
        };

        let limit = self.max_message_len.min(self.transport().max_message_len());
        let segments = split(&format_record(&record), limit);
        if segments.is_empty() {
            self.send(chat_id, EMPTY_RESULT_TEXT).await?;
            return Ok(());
        }

        info!(key = %key, segments = segments.len(), "Delivering result");
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.message_delay).await;
            }
            self.send(chat_id, segment).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::{message, supervised, ChatTransport, StaticBackend};
    use crate::lookup::QueryPolicy;
    use serde_json::json;

    fn handler(response: serde_json::Value, max_len: usize) -> (MessageHandler, Arc<ChatTransport>) {
        let transport = Arc::new(ChatTransport::default());
        let (supervisor, _) = supervised(vec![transport.clone()], None);
        let client = QueryClient::new(
            Arc::new(StaticBackend::new(response)),
            None,
            QueryPolicy::default(),
        );
        let handler =
            MessageHandler::new(supervisor, Arc::new(client), max_len, Duration::from_millis(200));
        (handler, transport)
    }

    fn full_record() -> serde_json::Value {
        let relatives: Vec<_> = (0..40)
            .map(|i| json!({ "nomeParente": format!("PARENTE {}", i), "cpfParente": "00000000000", "grauParentesco": "IRMAO" }))
            .collect();
        json!({
            "status": 200,
            "DadosBasicos": { "nome": "FULANO DE TAL", "cpf": "12345678909" },
            "parentes": relatives
        })
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/help@relay_bot"), Command::Help);
        assert_eq!(
            Command::parse("/consulta  123.456.789-09 "),
            Command::Lookup("123.456.789-09".into())
        );
        assert_eq!(Command::parse("/consulta"), Command::Ignore);
        assert_eq!(Command::parse("/other 1"), Command::Ignore);
        assert_eq!(Command::parse("123 456 789 09"), Command::Lookup("123 456 789 09".into()));
        assert_eq!(Command::parse("   "), Command::Ignore);
    }

    #[tokio::test]
    async fn test_start_and_help_reply() {
        let (h, transport) = handler(full_record(), 3900);

        h.handle(&message(1, "/start")).await;
        h.handle(&message(1, "/help")).await;

        let sent = transport.sent_texts();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("Bem-vindo"));
        assert!(sent[1].contains("AJUDA"));
    }

    #[tokio::test]
    async fn test_invalid_key_reply() {
        let (h, transport) = handler(full_record(), 3900);

        h.handle(&message(1, "hello")).await;
        h.handle(&message(1, "/consulta 111.111.111-11")).await;
        h.handle(&message(1, "/unknown")).await;

        assert_eq!(transport.sent_texts(), vec![INVALID_KEY_TEXT, INVALID_KEY_TEXT]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_delivers_ordered_segments() {
        let (h, transport) = handler(full_record(), 300);

        h.handle(&message(9, "/consulta 123.456.789-09")).await;

        let sent = transport.sent_texts();
        assert_eq!(sent[0], PROCESSING_TEXT);
        assert_eq!(transport.deleted(), vec![(9, 1)]);

        let segments = &sent[1..];
        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| crate::output::text_len(s) <= 300));
        assert!(segments[0].starts_with("📋"));
        let joined = segments.join("\n");
        let first = joined.find("PARENTE 0\n").unwrap();
        let last = joined.find("PARENTE 39\n").unwrap();
        assert!(first < last);
    }

    #[tokio::test]
    async fn test_missing_record_sends_not_found() {
        let (h, transport) = handler(json!({ "status": 200, "outro": {} }), 3900);

        h.handle(&message(3, "12345678909")).await;

        assert_eq!(transport.sent_texts(), vec![PROCESSING_TEXT, NOT_FOUND_TEXT]);
        assert_eq!(transport.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_lookup_sends_not_found() {
        let (h, transport) = handler(json!({ "status": 404 }), 3900);

        h.handle(&message(3, "12345678909")).await;
        assert_eq!(transport.sent_texts().last().map(String::as_str), Some(NOT_FOUND_TEXT));
    }

    #[tokio::test]
    async fn test_delivery_error_sends_generic_reply() {
        let (h, transport) = handler(full_record(), 3900);
        transport.fail_sends_after(1);

        h.lookup(3, &LookupKey::parse("12345678909").unwrap()).await;

        // Processing notice went out, the result failed, then the fallback was attempted
        assert_eq!(transport.send_attempts(), 3);
    }
}
