/// 示例过程与就绪脚本

use serde_json::json;
use tracing::{info, warn};
use unij_common::{Channel, RpcError};

/// 注册服务端可以调用的过程
pub fn register_procedures(channel: &Channel) {
    channel.add_procedure(
        "showThemApples",
        |_, args| {
            let apples: serde_json::Value = args.get(0)?;
            info!("🍎 showThemApples: {}", apples);
            Ok(())
        },
        false,
    );
}

/// 就绪后执行的脚本
///
/// 先提议改名（服务端确认后才会生效），再调用服务端的过程。
pub fn on_ready(channel: &Channel, desired_name: &str) {
    if let Err(e) = run_on_ready(channel, desired_name) {
        warn!("就绪脚本执行失败: {}", e);
    }
}

fn run_on_ready(channel: &Channel, desired_name: &str) -> Result<(), RpcError> {
    info!("当前名称: {}，提议改名为: {}", channel.client_name(), desired_name);
    channel.set_client_name(desired_name)?;
    channel.execute("printToConsole", vec![json!("Hello there!")])?;
    channel.execute("destroyAndShow", vec![json!("This was a sentence once")])?;
    Ok(())
}
