/// Lua script for fixed window counting in Redis
///
/// Increments the counter and arms its expiry on first creation only, so
/// later increments never extend the window. Runs atomically on the server.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (milliseconds)
///
/// Returns: [current count, remaining ttl in milliseconds]
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])

local current = redis.call('INCR', key)

if current == 1 then
    redis.call('PEXPIRE', key, window)
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    -- Counter without expiry (left over from an interrupted writer)
    redis.call('PEXPIRE', key, window)
    ttl = window
end

return {current, ttl}
"#;
