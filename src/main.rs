fn main() {
    std::process::exit(ninja::run::run());
}
