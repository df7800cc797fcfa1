fn main() {
    project_todo_lib::run()
}
