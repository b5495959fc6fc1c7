use luabind::{BindError, EnvConfig, Environment};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

fn write_scripts(dir: &TempDir, scripts: &[(&str, &str)]) {
    for (name, source) in scripts {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, source).unwrap();
    }
}

#[test]
fn test_run_file_and_result() {
    let dir = TempDir::new().unwrap();
    write_scripts(&dir, &[("answer.lua", "answer = 40\nreturn answer + 2")]);

    let env = Environment::new().unwrap();
    let result: i64 = env.run_file_with(dir.path().join("answer.lua")).unwrap();
    assert_eq!(result, 42);
    assert_eq!(env.get::<i64>("answer").unwrap(), 40);
}

#[test]
fn test_missing_file_is_host_error() {
    let dir = TempDir::new().unwrap();
    let env = Environment::new().unwrap();

    let err = env.run_file(dir.path().join("missing.lua")).unwrap_err();
    assert!(matches!(err, BindError::HostLoad { .. }));
    assert!(!err.is_script_level());

    let err = env.run_dir(dir.path().join("nowhere"), false).unwrap_err();
    assert!(matches!(err, BindError::HostLoad { .. }));
}

#[test]
fn test_syntax_error_names_the_file() {
    let dir = TempDir::new().unwrap();
    write_scripts(&dir, &[("broken.lua", "local = 1")]);

    let env = Environment::new().unwrap();
    let err = env.run_file(dir.path().join("broken.lua")).unwrap_err();
    assert!(matches!(err, BindError::Script(_)));
    assert!(err.to_string().contains("broken.lua"), "{}", err);
}

#[test]
fn test_run_dir_in_sorted_order() {
    let dir = TempDir::new().unwrap();
    write_scripts(
        &dir,
        &[
            ("20_second.lua", "order = order .. 'b'"),
            ("10_first.lua", "order = 'a'"),
            ("30_third.lua", "order = order .. 'c'"),
            ("readme.txt", "this is not lua"),
            ("nested/40_deep.lua", "order = order .. 'd'"),
        ],
    );

    let env = Environment::new().unwrap();
    assert_eq!(env.run_dir(dir.path(), false).unwrap(), 3);
    assert_eq!(env.get::<String>("order").unwrap(), "abc");

    let env = Environment::new().unwrap();
    assert_eq!(env.run_dir(dir.path(), true).unwrap(), 4);
    assert_eq!(env.get::<String>("order").unwrap(), "abcd");
}

#[test]
fn test_run_dir_stops_at_first_failure() {
    let dir = TempDir::new().unwrap();
    write_scripts(
        &dir,
        &[
            ("a.lua", "ran = 1"),
            ("b.lua", "error('stop here')"),
            ("c.lua", "ran = 3"),
        ],
    );

    let env = Environment::new().unwrap();
    let err = env.run_dir(dir.path(), false).unwrap_err();
    assert!(err.to_string().contains("stop here"));
    assert_eq!(env.get::<i64>("ran").unwrap(), 1);
}

#[test]
fn test_custom_extension() {
    let dir = TempDir::new().unwrap();
    write_scripts(&dir, &[("one.script", "count = 1"), ("two.lua", "count = 2")]);

    let env = Environment::with_config(EnvConfig::new().with_script_extension("script")).unwrap();
    assert_eq!(env.run_dir(dir.path(), false).unwrap(), 1);
    assert_eq!(env.get::<i64>("count").unwrap(), 1);
}

#[test]
fn test_memory_limit() {
    let env = Environment::with_config(EnvConfig::new().with_memory_limit(512 * 1024)).unwrap();
    let err = env
        .run_string("local t = {} for i = 1, 1e7 do t[i] = tostring(i) end")
        .unwrap_err();
    assert!(matches!(err, BindError::Script(mlua::Error::MemoryError(_))));
}

#[cfg(unix)]
#[test]
fn test_run_dir_survives_symlink_cycle() {
    let dir = TempDir::new().unwrap();
    write_scripts(&dir, &[("a.lua", "runs = (runs or 0) + 1"), ("sub/b.lua", "seen = true")]);
    std::os::unix::fs::symlink(dir.path(), dir.path().join("sub").join("loop")).unwrap();

    let env = Environment::new().unwrap();
    assert_eq!(env.run_dir(dir.path(), true).unwrap(), 2);
    assert_eq!(env.get::<i64>("runs").unwrap(), 1);
    assert!(env.get::<bool>("seen").unwrap());
}

#[test]
fn test_run_dir_any_extension() {
    let dir = TempDir::new().unwrap();
    write_scripts(&dir, &[("init", "count = 1"), ("more.txt", "count = count + 1")]);

    let env = Environment::with_config(EnvConfig::new().with_any_extension()).unwrap();
    assert_eq!(env.run_dir(dir.path(), false).unwrap(), 2);
    assert_eq!(env.get::<i64>("count").unwrap(), 2);
}
