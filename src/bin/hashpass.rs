use std::env;
use std::process::exit;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: hashpass <password>");
        exit(1);
    }

    match bcrypt::hash(&args[1], bcrypt::DEFAULT_COST) {
        Ok(hash) => println!("{}", hash),
        Err(e) => {
            eprintln!("hashpass: {}", e);
            exit(1);
        }
    }
}
