pub const APP_ID_BASE: &str = "io.capmirror";

pub const DBUS_NAME_BACKUP: &str = "io.capmirror.Backup1";
pub const DBUS_INTERFACE_BACKUP: &str = "io.capmirror.Backup1";
pub const DBUS_OBJECT_PATH_BACKUP: &str = "/io/capmirror/Backup1";

pub const DBUS_ERROR_NOT_READY: &str = "io.capmirror.Backup1.Error.NotReady";
pub const DBUS_ERROR_FAILED: &str = "io.capmirror.Backup1.Error.Failed";
