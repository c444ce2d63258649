//! Notification sink for due-soon and overdue reminders

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
    models::{Book, Borrowing, User},
};

/// Due-soon/overdue message delivery.
///
/// Fire-and-forget from the sweep's perspective: delivery failures are
/// logged by the caller and never fail the batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_due_soon(&self, borrowing: &Borrowing, user: &User, book: &Book)
        -> AppResult<()>;

    async fn notify_overdue(&self, borrowing: &Borrowing, user: &User, book: &Book)
        -> AppResult<()>;
}

/// SMTP notifier sending the reminder mails.
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let mut builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("SMTP relay error: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        };

        builder = builder.port(self.config.smtp_port);

        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let message = Message::builder()
            .from(
                self.config
                    .smtp_from
                    .parse()
                    .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        self.transport()?
            .send(&message)
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for EmailNotifier {
    async fn notify_due_soon(
        &self,
        borrowing: &Borrowing,
        user: &User,
        book: &Book,
    ) -> AppResult<()> {
        let subject = format!("Pengingat: Buku \"{}\" akan jatuh tempo besok", book.title);
        let body = format!(
            "Halo {}, buku \"{}\" akan jatuh tempo pada {}. \
             Jangan lupa kembalikan untuk menghindari denda.",
            user.name,
            book.title,
            borrowing.due_at.format("%Y-%m-%d"),
        );
        self.send(&user.email, &subject, &body)
    }

    async fn notify_overdue(
        &self,
        borrowing: &Borrowing,
        user: &User,
        book: &Book,
    ) -> AppResult<()> {
        let subject = format!(
            "Peringatan: Buku \"{}\" sudah melewati tanggal pengembalian",
            book.title
        );
        let body = format!(
            "Halo {}, buku \"{}\" terlambat dikembalikan sejak {}. \
             Denda akan dikenakan sesuai aturan.",
            user.name,
            book.title,
            borrowing.due_at.format("%Y-%m-%d"),
        );
        self.send(&user.email, &subject, &body)
    }
}

/// Notifier that only logs, for deployments without SMTP.
#[derive(Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify_due_soon(
        &self,
        borrowing: &Borrowing,
        user: &User,
        book: &Book,
    ) -> AppResult<()> {
        tracing::debug!(
            borrowing_id = %borrowing.id,
            user_id = %user.id,
            book = %book.title,
            "due-soon reminder suppressed (email disabled)"
        );
        Ok(())
    }

    async fn notify_overdue(
        &self,
        borrowing: &Borrowing,
        user: &User,
        book: &Book,
    ) -> AppResult<()> {
        tracing::debug!(
            borrowing_id = %borrowing.id,
            user_id = %user.id,
            book = %book.title,
            "overdue notice suppressed (email disabled)"
        );
        Ok(())
    }
}
