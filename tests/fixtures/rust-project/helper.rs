pub fn format_data(data: &str) -> String {
    format!("[{}]", data)
}

fn internal_helper() {
    println!("internal");
}
