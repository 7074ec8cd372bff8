use flatfs::{Error, Filesystem};

fn prompt(separator: &str) -> Option<Vec<String>> {
    use std::io::Write;
    let mut line = String::new();
    print!("{separator}");
    std::io::stdout().flush().unwrap();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().split(' ').map(str::to_string).collect()),
        Err(_) => None,
    }
}

fn execute(fs: &mut Filesystem, cmd: &[String]) -> Result<(), Error> {
    match cmd[0].as_str() {
        "i" => print!["{}", fs.info()],
        "l" => print!["{}", fs.ls()],
        "s" => println!["{}", fs.superblock()],
        "f" => println!["{}", fs.fat()],
        "c" if cmd.len() == 2 => fs.create(&cmd[1])?,
        "d" if cmd.len() == 2 => fs.delete(&cmd[1])?,
        _ => eprintln!("commands: i l s f c <name> d <name> q"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let path = args.first().map(String::as_str).unwrap_or("/tmp/disk.fs");
    let mut fs = Filesystem::mount(path)?;
    loop {
        let Some(cmd) = prompt(">> ") else {
            break;
        };
        if cmd.is_empty() || cmd[0].is_empty() {
            continue;
        }
        if cmd[0] == "q" {
            break;
        }
        if let Err(e) = execute(&mut fs, &cmd) {
            eprintln!("{e}");
        }
    }
    if let Err((_, e)) = fs.umount() {
        return Err(Box::new(e));
    }
    Ok(())
}
