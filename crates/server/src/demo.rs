/// 示例过程与脚本
///
/// 演示服务端如何注册过程，以及如何主动调用客户端的过程

use crate::ws::ClientHub;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// 示例脚本中改名后的客户端名称
const RENAMED_CLIENT: &str = "because I can";

/// 注册示例过程
pub fn register_procedures(hub: &ClientHub) {
    // 把客户端发来的文本打印到控制台
    hub.add_procedure(
        "printToConsole",
        |_, args| {
            let message: String = args.get(0)?;
            println!("{}", message);
            Ok(())
        },
        false,
    );

    // 把每个字符随机偏移后打印
    hub.add_procedure(
        "destroyAndShow",
        |_, args| {
            let text: String = args.get(0)?;
            println!("{}", destroy_string(&text, &mut rand::thread_rng()));
            Ok(())
        },
        false,
    );
}

/// 每个字符偏移 [-10, 10) 范围内的随机量
///
/// 偏移后不是合法字符的保持原样。
pub fn destroy_string<R: Rng>(text: &str, rng: &mut R) -> String {
    text.chars()
        .map(|c| {
            let offset: i64 = rng.gen_range(-10..10);
            u32::try_from(i64::from(u32::from(c)) + offset)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(c)
        })
        .collect()
}

/// 示例脚本：等待第一个客户端，然后依次调用客户端的过程
pub async fn run_scenario(hub: ClientHub) {
    info!("⏳ 等待第一个客户端连接...");
    hub.wait_for_first_client().await;

    // 调用所有客户端的 showThemApples
    hub.execute_all("showThemApples", vec![json!({"name": "apples"})]);

    // 客户端没有这个过程，会在客户端侧产生警告
    hub.execute_all("iDontExist", vec![json!(404)]);

    // 等客户端改名后直接按名称调用
    tokio::time::sleep(Duration::from_secs(2)).await;
    if let Err(e) = hub.execute(RENAMED_CLIENT, "showThemApples", vec![json!("them apples")]) {
        warn!("示例脚本调用失败: {}", e);
    }
}
