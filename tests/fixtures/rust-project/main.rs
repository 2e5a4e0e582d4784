mod helper;
mod utils;

use utils::database::{connect_db, disconnect_db};

fn main() {
    let _connection = connect_db();
    let data = helper::format_data("test");
    println!("{}", data);
}
