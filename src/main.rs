fn main() {
    if let Err(err) = mindanchor_lib::run() {
        eprintln!("mindanchor: {err:#}");
        std::process::exit(1);
    }
}
