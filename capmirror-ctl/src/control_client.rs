use anyhow::{Context, Result};
use capmirror_integrations::JobSnapshot;
use capmirror_integrations::ids::{
    DBUS_INTERFACE_BACKUP, DBUS_NAME_BACKUP, DBUS_OBJECT_PATH_BACKUP,
};
use zbus::blocking::{Connection, Proxy};

pub struct ControlClient {
    connection: Connection,
}

impl ControlClient {
    pub fn connect() -> Result<Self> {
        let connection =
            Connection::session().context("failed to connect to session D-Bus for Backup1")?;
        Ok(Self { connection })
    }

    pub fn trigger(&self, reset: bool) -> Result<String> {
        let reply: String = self
            .proxy()?
            .call("Trigger", &(reset,))
            .context("Trigger failed")?;
        Ok(reply)
    }

    pub fn status(&self) -> Result<JobSnapshot> {
        let encoded: String = self
            .proxy()?
            .call("GetStatus", &())
            .context("GetStatus failed")?;
        serde_json::from_str(&encoded).context("daemon returned an unreadable status")
    }

    fn proxy(&self) -> Result<Proxy<'_>> {
        Proxy::new(
            &self.connection,
            DBUS_NAME_BACKUP,
            DBUS_OBJECT_PATH_BACKUP,
            DBUS_INTERFACE_BACKUP,
        )
        .context("failed to create Backup1 proxy")
    }
}
