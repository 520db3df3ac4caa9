fn main() {
    std::process::exit(syncsh::run());
}
