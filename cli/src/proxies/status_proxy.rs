use zbus::{Result, proxy};
#[proxy(
    default_service = "com.canonical.stemlabd",
    interface = "com.canonical.stemlabd.status",
    default_path = "/com/canonical/stemlabd/status"
)]
pub trait Status {
    async fn list_modules(&self) -> Result<String>;
    async fn list_attributes(&self, module: &str) -> Result<String>;
    async fn get_attribute(&self, module: &str, attribute: &str) -> Result<String>;
    async fn get_owner(&self, module: &str) -> Result<String>;
    async fn get_setup(&self, module: &str) -> Result<String>;
    async fn get_signal_stats(&self, signal: &str, duration_ms: u32) -> Result<String>;
    async fn curve_ready(&self, module: &str) -> Result<bool>;
    async fn get_curve(&self, module: &str) -> Result<String>;
    async fn read_registers(&self, address: u32, length: u32) -> Result<Vec<u32>>;
}
