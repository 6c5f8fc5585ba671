use super::SshCommand;
use std::ffi::OsString;

fn args_to_strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn assembles_minimal_command_with_batch_mode() {
    let invocation = SshCommand::new("example.com").into_invocation();

    assert_eq!(invocation.program(), "ssh");
    assert_eq!(
        args_to_strings(invocation.arguments()),
        vec!["-oBatchMode=yes".to_owned(), "example.com".to_owned()]
    );
}

#[test]
fn assembles_command_with_user_port_and_remote_args() {
    let mut command = SshCommand::new("backup.example.com");
    command.set_user("root");
    command.set_port(2222);
    command.push_remote_arg("zfs list -H tank");

    let invocation = command.into_invocation();

    assert_eq!(
        args_to_strings(invocation.arguments()),
        vec![
            "-oBatchMode=yes".to_owned(),
            "-p".to_owned(),
            "2222".to_owned(),
            "root@backup.example.com".to_owned(),
            "zfs list -H tank".to_owned(),
        ]
    );
}

#[test]
fn wraps_ipv6_hosts_with_usernames() {
    let mut command = SshCommand::new("2001:db8::1");
    command.set_user("backup");

    assert_eq!(
        args_to_strings(command.into_invocation().arguments()),
        vec![
            "-oBatchMode=yes".to_owned(),
            "backup@[2001:db8::1]".to_owned()
        ]
    );
}

#[test]
fn preserves_explicit_bracketed_ipv6_literals() {
    let mut command = SshCommand::new("[2001:db8::1]");
    command.set_user("backup");

    assert_eq!(
        args_to_strings(command.into_invocation().arguments()),
        vec![
            "-oBatchMode=yes".to_owned(),
            "backup@[2001:db8::1]".to_owned()
        ]
    );
}

#[test]
fn skips_target_when_host_missing() {
    let mut command = SshCommand::new("");
    command.push_remote_arg("zfs").push_remote_arg("list");

    assert_eq!(
        args_to_strings(command.into_invocation().arguments()),
        vec!["-oBatchMode=yes".to_owned(), "zfs".to_owned(), "list".to_owned()]
    );
}
