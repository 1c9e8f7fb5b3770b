use crate::sync::ProjectFileSet;

#[derive(Debug, Clone, Copy)]
pub struct ProjectTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub main_file: &'static str,
    pub files: &'static [(&'static str, &'static str)],
}

impl ProjectTemplate {
    pub fn project_files(&self) -> ProjectFileSet {
        self.files.iter().fold(
            ProjectFileSet::new(self.main_file),
            |set, (path, contents)| set.with_file(path, *contents),
        )
    }

    pub fn main_contents(&self) -> &'static str {
        self.files
            .iter()
            .find(|(path, _)| *path == self.main_file)
            .map_or("", |(_, contents)| *contents)
    }
}

const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "lib": ["dom", "dom.iterable", "esnext"],
    "strict": true,
    "noEmit": true,
    "module": "esnext",
    "moduleResolution": "bundler",
    "jsx": "preserve",
    "paths": { "@/*": ["./*"] }
  },
  "include": ["next-env.d.ts", "**/*.ts", "**/*.tsx"],
  "exclude": ["node_modules"]
}"#;

const NEXT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
const nextConfig = { reactStrictMode: true };
module.exports = nextConfig;"#;

const NEXTJS_STARTER: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{
  "name": "my-app",
  "version": "0.1.0",
  "private": true,
  "scripts": { "dev": "next dev", "build": "next build", "start": "next start" },
  "dependencies": { "next": "14.x", "react": "^18", "react-dom": "^18" },
  "devDependencies": { "typescript": "^5", "tailwindcss": "^3", "postcss": "^8", "autoprefixer": "^10" }
}"#,
    ),
    (
        "tailwind.config.js",
        r#"/** @type {import('tailwindcss').Config} */
module.exports = {
  content: ['./app/**/*.{js,ts,jsx,tsx}', './components/**/*.{js,ts,jsx,tsx}'],
  theme: { extend: {} },
  plugins: [],
}"#,
    ),
    ("tsconfig.json", TSCONFIG),
    ("next.config.js", NEXT_CONFIG),
    ("app/globals.css", "@tailwind base;\n@tailwind components;\n@tailwind utilities;"),
    (
        "app/layout.tsx",
        r#"import './globals.css';
export default function RootLayout({ children }: { children: React.ReactNode }) {
  return (
    <html lang="en">
      <body className="bg-slate-50 text-slate-900">{children}</body>
    </html>
  );
}"#,
    ),
    (
        "app/page.tsx",
        r#"export default function Home() {
  return (
    <main className="min-h-screen p-8">
      <h1 className="text-3xl font-bold">Hello from Comet</h1>
      <p className="mt-4 text-slate-600">Start building your app...</p>
    </main>
  );
}"#,
    ),
];

const API_ONLY: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{
  "name": "my-api",
  "version": "0.1.0",
  "private": true,
  "scripts": { "dev": "next dev", "build": "next build", "start": "next start" },
  "dependencies": { "next": "14.x" },
  "devDependencies": { "typescript": "^5" }
}"#,
    ),
    ("tsconfig.json", TSCONFIG),
    ("next.config.js", NEXT_CONFIG),
    (
        "app/layout.tsx",
        r#"export default function RootLayout({ children }: { children: React.ReactNode }) {
  return <html><body>{children}</body></html>;
}"#,
    ),
    (
        "app/page.tsx",
        r#"export default function Home() {
  return (
    <main className="min-h-screen p-8 font-mono text-sm">
      <h1 className="text-xl font-bold mb-4">API Server</h1>
      <p>Try <a href="/api/hello">/api/hello</a></p>
    </main>
  );
}"#,
    ),
    (
        "app/api/hello/route.ts",
        r#"import { NextResponse } from 'next/server';

export async function GET() {
  return NextResponse.json({ message: 'Hello from the Comet API!' });
}

export async function POST(request: Request) {
  const body = await request.json();
  return NextResponse.json({ received: body });
}"#,
    ),
];

pub const TEMPLATES: &[ProjectTemplate] = &[
    ProjectTemplate {
        key: "nextjs-starter",
        name: "Next.js Starter",
        description: "Next.js 14 + Tailwind + TypeScript",
        main_file: "app/page.tsx",
        files: NEXTJS_STARTER,
    },
    ProjectTemplate {
        key: "api-only",
        name: "API Server",
        description: "Next.js API routes only, minimal UI",
        main_file: "app/api/hello/route.ts",
        files: API_ONLY,
    },
];

pub fn find_template(key: &str) -> Option<&'static ProjectTemplate> {
    TEMPLATES.iter().find(|template| template.key == key)
}
