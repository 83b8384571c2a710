use std::time::Duration;

use async_trait::async_trait;

/// Successful dispatch. `link` carries the deep link when the transport is
/// link-based rather than push-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub link: Option<String>,
}

#[derive(Debug)]
pub struct DispatchError(pub String);

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// External messaging collaborator. Actual transport (WhatsApp/SMS/email)
/// lives behind this seam.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<DeliveryReceipt, DispatchError>;
}

/// Every dispatcher call is bounded; a hung provider must not stall the
/// sweep or the booking path.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn dispatch_with_timeout(
    dispatcher: &dyn Dispatcher,
    phone: &str,
    message: &str,
) -> Result<DeliveryReceipt, DispatchError> {
    match tokio::time::timeout(DISPATCH_TIMEOUT, dispatcher.send(phone, message)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError("timed out".into())),
    }
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Produces `wa.me` deep links instead of pushing messages. "Sent" means
/// the link was generated and handed back for the club to forward.
pub struct WhatsAppLinkDispatcher;

#[async_trait]
impl Dispatcher for WhatsAppLinkDispatcher {
    async fn send(&self, phone: &str, message: &str) -> Result<DeliveryReceipt, DispatchError> {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(DispatchError("no destination phone".into()));
        }
        let link = format!("https://wa.me/{digits}?text={}", percent_encode(message));
        Ok(DeliveryReceipt { link: Some(link) })
    }
}

/// Recording double for tests: captures every send, optionally failing all
/// of them.
#[derive(Default)]
pub struct MockDispatcher {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockDispatcher {
    pub fn failing() -> Self {
        let d = Self::default();
        d.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        d
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn send(&self, phone: &str, message: &str) -> Result<DeliveryReceipt, DispatchError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DispatchError("mock failure".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(DeliveryReceipt { link: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_dispatcher_builds_wa_me_url() {
        let receipt = WhatsAppLinkDispatcher
            .send("+52 55 1112 2233", "Reserva confirmada: 10:00")
            .await
            .unwrap();
        let link = receipt.link.unwrap();
        assert!(link.starts_with("https://wa.me/5255111222"));
        assert!(link.contains("text=Reserva%20confirmada%3A%2010%3A00"));
    }

    #[tokio::test]
    async fn link_dispatcher_rejects_empty_phone() {
        let result = WhatsAppLinkDispatcher.send("", "hola").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mock_records_sends() {
        let mock = MockDispatcher::default();
        mock.send("5511122233", "hi").await.unwrap();
        assert_eq!(mock.sent_count(), 1);
        assert!(MockDispatcher::failing().send("5511122233", "hi").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_slow_dispatchers() {
        struct Stalled;
        #[async_trait]
        impl Dispatcher for Stalled {
            async fn send(&self, _: &str, _: &str) -> Result<DeliveryReceipt, DispatchError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(DeliveryReceipt { link: None })
            }
        }

        let result = dispatch_with_timeout(&Stalled, "5511122233", "hi").await;
        assert!(result.is_err());
    }
}
