#[derive(Clone, Debug)]
pub(crate) struct MailMessage {
    pub(crate) to_contact: String,
    pub(crate) template: &'static str,
    pub(crate) payload_json: String,
}

/// Outbound-mail collaborator. Delivery is external to this system; the
/// auth flows only hand a message over and move on.
pub(crate) trait MailSender: Send + Sync {
    fn send(&self, message: &MailMessage) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub(crate) struct LogMailSender;

impl MailSender for LogMailSender {
    fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        tracing::info!(
            event = "mail.send",
            to_contact = %message.to_contact,
            template = message.template,
            payload = %message.payload_json,
            "mail handed to delivery collaborator"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) struct CapturingMailSender {
    pub(crate) messages: std::sync::Mutex<Vec<MailMessage>>,
}

#[cfg(test)]
impl CapturingMailSender {
    pub(crate) fn new() -> Self {
        Self {
            messages: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl MailSender for CapturingMailSender {
    fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        self.messages
            .lock()
            .expect("capturing mail mutex should not be poisoned")
            .push(message.clone());
        Ok(())
    }
}
