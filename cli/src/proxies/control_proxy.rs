use zbus::{Result, proxy};
#[proxy(
    default_service = "com.canonical.stemlabd",
    interface = "com.canonical.stemlabd.control",
    default_path = "/com/canonical/stemlabd/control"
)]
pub trait Control {
    async fn set_attribute(&self, module: &str, attribute: &str, json: &str) -> Result<String>;
    async fn setup(&self, module: &str, json_object: &str) -> Result<String>;
    async fn acquire(&self, module: &str, owner: &str) -> Result<String>;
    async fn release(&self, module: &str) -> Result<String>;
    async fn write_registers(&self, address: u32, values: Vec<u32>) -> Result<String>;
}
