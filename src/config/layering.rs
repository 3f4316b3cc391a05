//! 提供者配置分层合并
//!
//! 框架默认值 → 祖先提供者配置 → 切片设置 → 自身覆盖，逐层调用 `merge_layer`。

use serde_json::Value;

/// 将 `layer` 合并到 `base` 上
///
/// 对象递归合并；数组取并集并保持首次出现的顺序；其余值直接覆盖。
/// `layer` 中的 `null` 不会抹掉已有值。
pub fn merge_layer(base: &mut Value, layer: &Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_layer(existing, value),
                    None => {
                        if !value.is_null() {
                            base_map.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(layer_items)) => {
            for item in layer_items {
                if !base_items.contains(item) {
                    base_items.push(item.clone());
                }
            }
        }
        (base, layer) => *base = layer.clone(),
    }
}
