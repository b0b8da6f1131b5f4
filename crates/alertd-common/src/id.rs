use snowflake::SnowflakeIdGenerator;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdGenerator>> = Mutex::new(None);

/// 初始化 Snowflake ID 生成器
///
/// `machine_id`: 机器标识 (0-31)
/// `node_id`: 节点标识 (0-31)
///
/// 只有第一次调用生效；生成器一旦创建就不再替换，否则同一毫秒内可能产生重复 ID。
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if gen.is_none() {
        *gen = Some(SnowflakeIdGenerator::new(machine_id, node_id));
    }
}

/// 生成一个 Snowflake ID，用作所有表的主键。
///
/// 同一进程内单调递增，因此按 ID 升序即为插入顺序。
pub fn next_id() -> i64 {
    let mut gen = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    gen.get_or_insert_with(|| SnowflakeIdGenerator::new(1, 1))
        .generate()
}
